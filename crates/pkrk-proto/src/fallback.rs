//! Built-in catalog used whenever the catalog service is unreachable or
//! returns something we cannot trust.  Mirrors the CDN folder layout.

use crate::model::{Category, Episode, Show};

pub const FALLBACK_CATEGORY_IDS: [&str; 4] = ["film-songs", "podcasts", "stories", "web-series"];

fn category(id: &str, name: &str, description: &str, shows: &[&str]) -> Category {
    Category {
        category_id: id.to_string(),
        display_name: name.to_string(),
        description: description.to_string(),
        background_image: format!("{}-bg.jpg", id),
        shows: Some(shows.iter().map(|s| s.to_string()).collect()),
        seasons: None,
        subcategories: None,
    }
}

fn episode(id: &str, title: &str, audio_path: &str, duration: &str) -> Episode {
    Episode {
        episode_id: id.to_string(),
        title: title.to_string(),
        audio_path: audio_path.to_string(),
        duration: duration.to_string(),
    }
}

fn show(
    category_id: &str,
    id: &str,
    title: &str,
    description: &str,
    cover_image: Option<&str>,
    episodes: Vec<Episode>,
) -> Show {
    Show {
        show_id: id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        cover_image: cover_image.map(str::to_string),
        episodes,
        category_id: Some(category_id.to_string()),
    }
}

pub fn categories() -> Vec<Category> {
    vec![
        category(
            "film-songs",
            "Film Songs",
            "Popular Kannada film songs",
            &["hit-kannada-songs-vol1"],
        ),
        category(
            "podcasts",
            "Podcasts",
            "Interesting Kannada podcasts and talk shows",
            &["season1"],
        ),
        category(
            "stories",
            "Stories",
            "Thrilling audio stories in Kannada",
            &["bhootada-mane-1"],
        ),
        category(
            "web-series",
            "Web Series",
            "Engaging Kannada web series",
            &["jackie1"],
        ),
    ]
}

/// Fallback shows for a category.  `None` means the scope has no fallback
/// and the caller should resolve to an empty list.
pub fn shows(category_id: &str) -> Option<Vec<Show>> {
    let shows = match category_id {
        "film-songs" => vec![show(
            category_id,
            "hit-kannada-songs-vol1",
            "Hit Kannada Songs Vol 1",
            "Popular Kannada film songs collection",
            Some("monsoon-raga-thumb.jpg"),
            vec![
                episode(
                    "hks1_e1",
                    "Hombisilina",
                    "film-songs/hit-kannada-songs-vol1/MonsoonRaga/Hombisilina (PenduJatt.Com.Se).mp3",
                    "4:30",
                ),
                episode(
                    "hks1_e2",
                    "Muddada Moothi",
                    "film-songs/hit-kannada-songs-vol1/MonsoonRaga/Muddada Moothi (PenduJatt.Com.Se).mp3",
                    "3:45",
                ),
                episode(
                    "hks1_e3",
                    "Hesaru Poorthi",
                    "film-songs/hit-kannada-songs-vol1/Paramathma/Hesaru Poorthi (PenduJatt.Com.Se).mp3",
                    "4:15",
                ),
                episode(
                    "hks1_e4",
                    "Kuch Kuch Anthide",
                    "film-songs/hit-kannada-songs-vol1/Raj/Kuch Kuch Anthide (PenduJatt.Com.Se).mp3",
                    "3:20",
                ),
            ],
        )],
        "stories" => vec![show(
            category_id,
            "bhootada-mane-1",
            "Bhootada Mane Season 1",
            "Thrilling horror stories in Kannada",
            Some("bhootada-mane-1-thumb.jpg"),
            vec![
                episode(
                    "bm1_s1_e1",
                    "Episode 1",
                    "stories/horror/BhootadaMane1/season1/episode1.mp3",
                    "25:00",
                ),
                episode(
                    "bm1_s1_e2",
                    "Episode 2",
                    "stories/horror/BhootadaMane1/season1/episode2.mp3",
                    "28:00",
                ),
            ],
        )],
        "web-series" => vec![show(
            category_id,
            "jackie1",
            "Jackie Season 1",
            "Engaging Kannada web series",
            Some("jackie1-thumb.jpg"),
            vec![
                episode(
                    "jackie1_s1_e1",
                    "Episode 1",
                    "web-series/jackie1/season1/episode1.mp3",
                    "30:00",
                ),
                episode(
                    "jackie1_s1_e2",
                    "Episode 2",
                    "web-series/jackie1/season1/episode2.mp3",
                    "32:00",
                ),
            ],
        )],
        "podcasts" => vec![show(
            category_id,
            "season1",
            "Podcast Season 1",
            "Interesting Kannada podcasts and talk shows",
            None,
            vec![
                episode("pod_s1_e1", "Episode 1", "podcasts/season1/episode1.mp3", "45:00"),
                episode("pod_s1_e2", "Episode 2", "podcasts/season1/episode2.mp3", "42:00"),
            ],
        )],
        _ => return None,
    };
    Some(shows)
}

/// Storage path behind the "play sample" button of a category.
pub fn sample_audio_path(category_id: &str) -> Option<&'static str> {
    match category_id {
        "film-songs" => Some(
            "film-songs/hit-kannada-songs-vol1/MonsoonRaga/Hombisilina (PenduJatt.Com.Se).mp3",
        ),
        "podcasts" => Some("podcasts/season1/episode1.mp3"),
        "stories" => Some("stories/horror/BhootadaMane1/season1/episode1.mp3"),
        "web-series" => Some("web-series/jackie1/season1/episode1.mp3"),
        _ => None,
    }
}

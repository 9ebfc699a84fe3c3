//! Wire formats of the platform's JSON API.

use crate::model::{PageUnit, PlayInfo, QualityCatalog, StreamCandidate, VideoItem};
use serde::Deserialize;

/// The `{code, message, data}` envelope every endpoint answers with.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

/// `/x/web-interface/view`
#[derive(Debug, Deserialize)]
pub struct ViewData {
    pub bvid: String,
    pub title: String,
    pub owner: Owner,
    #[serde(default)]
    pub pages: Vec<ViewPage>,
}

#[derive(Debug, Deserialize)]
pub struct Owner {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ViewPage {
    pub cid: i64,
    #[serde(default)]
    pub part: String,
}

impl From<ViewData> for VideoItem {
    fn from(view: ViewData) -> Self {
        Self {
            bvid: view.bvid,
            title: view.title,
            owner: view.owner.name,
            pages: view
                .pages
                .into_iter()
                .map(|page| PageUnit::new(page.cid, page.part))
                .collect(),
        }
    }
}

/// `/x/player/playurl`
#[derive(Debug, Deserialize)]
pub struct PlayUrlData {
    #[serde(default)]
    pub accept_quality: Vec<u32>,
    #[serde(default)]
    pub accept_description: Vec<String>,
    pub dash: Option<Dash>,
}

#[derive(Debug, Deserialize)]
pub struct Dash {
    #[serde(default)]
    pub video: Option<Vec<DashStream>>,
    #[serde(default)]
    pub audio: Option<Vec<DashStream>>,
    #[serde(default)]
    pub flac: Option<Flac>,
    #[serde(default)]
    pub dolby: Option<Dolby>,
}

#[derive(Debug, Deserialize)]
pub struct Flac {
    pub audio: Option<DashStream>,
}

#[derive(Debug, Deserialize)]
pub struct Dolby {
    #[serde(default)]
    pub audio: Option<Vec<DashStream>>,
}

#[derive(Debug, Deserialize)]
pub struct DashStream {
    pub id: u32,
    #[serde(default)]
    pub bandwidth: u64,
    #[serde(default)]
    pub base_url: Option<String>,
    // Both spellings are usually present; either may be missing.
    #[serde(default, rename = "baseUrl")]
    pub base_url_camel: Option<String>,
}

impl DashStream {
    fn url(self) -> String {
        self.base_url.or(self.base_url_camel).unwrap_or_default()
    }
}

impl PlayUrlData {
    /// Zips the accepted ranks with their descriptions.
    ///
    /// Descriptions such as `"1080P 高码率: 1080P+"` keep only the part after
    /// the first colon.
    pub fn catalog(&self) -> QualityCatalog {
        QualityCatalog::new(
            self.accept_quality
                .iter()
                .zip(self.accept_description.iter())
                .map(|(rank, description)| {
                    let description = match description.split_once(':') {
                        Some((_, label)) => label.trim(),
                        None => description.trim(),
                    };
                    (*rank, description.to_string())
                }),
        )
    }

    /// Flattens the DASH manifest into candidate lists.
    ///
    /// The `flac` entry is the Hi-Res audio variant; Dolby audio is offered as
    /// an ordinary candidate.
    pub fn into_play_info(self) -> PlayInfo {
        let Some(dash) = self.dash else {
            return PlayInfo::default();
        };

        let video = dash
            .video
            .unwrap_or_default()
            .into_iter()
            .map(|stream| StreamCandidate::video(stream.id, stream.bandwidth, stream.url()))
            .collect();

        let mut audio: Vec<StreamCandidate> = dash
            .audio
            .unwrap_or_default()
            .into_iter()
            .map(|stream| StreamCandidate::audio(stream.id, stream.bandwidth, stream.url()))
            .collect();

        if let Some(dolby) = dash.dolby.and_then(|dolby| dolby.audio) {
            audio.extend(dolby.into_iter().map(|stream| {
                StreamCandidate::audio(stream.id, stream.bandwidth, stream.url())
            }));
        }

        if let Some(flac) = dash.flac.and_then(|flac| flac.audio) {
            audio.push(StreamCandidate::audio(flac.id, flac.bandwidth, flac.url()).hi_res());
        }

        PlayInfo { video, audio }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_strips_description_prefix() {
        let data: PlayUrlData = serde_json::from_value(serde_json::json!({
            "accept_quality": [116, 80, 64],
            "accept_description": ["高清 1080P60", "高清: 1080P", " 720P "],
            "dash": null
        }))
        .unwrap();

        let catalog = data.catalog();
        assert_eq!(catalog.description(116), Some("高清 1080P60"));
        assert_eq!(catalog.description(80), Some("1080P"));
        assert_eq!(catalog.description(64), Some("720P"));
    }

    #[test]
    fn play_info_marks_flac_as_hi_res() {
        let data: PlayUrlData = serde_json::from_value(serde_json::json!({
            "dash": {
                "video": [{"id": 80, "bandwidth": 900, "baseUrl": "https://cdn/v80"}],
                "audio": [{"id": 30280, "bandwidth": 320, "base_url": "https://cdn/a"}],
                "dolby": {"type": 1, "audio": [{"id": 30250, "bandwidth": 400, "base_url": "https://cdn/d"}]},
                "flac": {"display": true, "audio": {"id": 30251, "bandwidth": 1000, "base_url": "https://cdn/f"}}
            }
        }))
        .unwrap();

        let info = data.into_play_info();
        assert_eq!(info.video.len(), 1);
        assert_eq!(info.video[0].url, "https://cdn/v80");
        assert_eq!(info.audio.len(), 3);
        assert!(info.audio.iter().any(|a| a.id == 30251 && a.hi_res));
        assert!(info.audio.iter().filter(|a| a.hi_res).count() == 1);
    }

    #[test]
    fn missing_dash_yields_no_candidates() {
        let data: PlayUrlData = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(data.into_play_info(), PlayInfo::default());
    }
}

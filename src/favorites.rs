//! Listing of the user's favorite folders and their contents.

use bili_dl::client::BiliClient;
use bili_dl::error::ApiError;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;

/// Items per listing page.
pub const PAGE_SIZE: usize = 20;

const CREATED_FOLDERS: &str = "/x/v3/fav/folder/created/list";
const COLLECTED_FOLDERS: &str = "/x/v3/fav/folder/collected/list";
const FOLDER_RESOURCES: &str = "/x/v3/fav/resource/list";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub media_count: u64,
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} videos)", self.title, self.media_count)
    }
}

/// One entry of a folder. Entries of deleted videos may lack a `bvid`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Media {
    #[serde(default)]
    pub bvid: Option<String>,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Page<T> {
    // Folder listings use `list`, folder contents `medias`.
    #[serde(default, alias = "medias")]
    list: Option<Vec<T>>,
}

/// Walks the paginated favorites endpoints.
#[derive(Debug, Clone)]
pub struct Favorites<'a> {
    client: &'a BiliClient,
    request_interval: Duration,
}

impl<'a> Favorites<'a> {
    pub fn new(client: &'a BiliClient, request_interval: Duration) -> Self {
        Self {
            client,
            request_interval,
        }
    }

    /// The folders the user created, followed by the ones they collected.
    pub async fn folders(&self, user_id: &str) -> Vec<Folder> {
        let mut folders = self
            .paginate::<Folder>(CREATED_FOLDERS, &[("up_mid", user_id.to_string())])
            .await;
        folders.extend(
            self.paginate::<Folder>(COLLECTED_FOLDERS, &[("up_mid", user_id.to_string())])
                .await,
        );
        folders
    }

    /// The video keys saved in a folder, in listing order.
    pub async fn bvids(&self, folder_id: i64) -> Vec<String> {
        self.paginate::<Media>(FOLDER_RESOURCES, &[("media_id", folder_id.to_string())])
            .await
            .into_iter()
            .filter_map(|media| media.bvid.filter(|bvid| !bvid.is_empty()))
            .collect()
    }

    /// Fetches pages until one comes back short.
    ///
    /// A failing page ends the listing; whatever was gathered so far is kept.
    async fn paginate<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Vec<T> {
        let mut results = Vec::new();
        let mut page = 1usize;

        loop {
            let mut query = vec![("pn", page.to_string()), ("ps", PAGE_SIZE.to_string())];
            query.extend(params.iter().cloned());

            let items = match self.client.get_json::<Page<T>>(path, &query).await {
                Ok(data) => data.list.unwrap_or_default(),
                Err(ApiError::Upstream { code, message }) => {
                    log::error!("API error {} on {}: {}", code, path, message);
                    break;
                }
                Err(e) => {
                    log::error!("Request to {} failed: {}", path, e);
                    break;
                }
            };

            let count = items.len();
            results.extend(items);
            if count < PAGE_SIZE {
                break;
            }

            page += 1;
            tokio::time::sleep(self.request_interval).await;
        }

        results
    }
}

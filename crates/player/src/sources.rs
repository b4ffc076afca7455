use std::time::Duration;

use async_trait::async_trait;

use crate::errors::PlayerError;
use crate::SourceKind;

const SOURCES_FETCH_TIMEOUT: Duration = Duration::from_secs(8);

/// Transcode/manifest targets the sources endpoint can be asked to prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareTarget {
    Fast,
    Hd,
    Hls,
}

impl PrepareTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrepareTarget::Fast => "fast",
            PrepareTarget::Hd => "hd",
            PrepareTarget::Hls => "hls",
        }
    }
}

#[derive(serde::Deserialize, Clone, Debug, Default)]
pub struct OriginalInfo {
    pub url: Option<String>,
    pub size: Option<u64>,
}

#[derive(serde::Deserialize, Clone, Debug, Default)]
pub struct RenditionInfo {
    pub url: Option<String>,
    pub ready: Option<bool>,
    pub size: Option<u64>,
}

#[derive(serde::Deserialize, Clone, Debug, Default)]
pub struct AdaptiveInfo {
    pub url: Option<String>,
    pub ready: Option<bool>,
    pub variants: Option<Vec<serde_json::Value>>,
}

/// Response of the video-sources endpoint. All fields optional; the client
/// merges whatever the server reported into its working set.
#[derive(serde::Deserialize, Clone, Debug, Default)]
pub struct SourcesResponse {
    pub original: Option<OriginalInfo>,
    pub fast: Option<RenditionInfo>,
    pub hd: Option<RenditionInfo>,
    pub hls: Option<AdaptiveInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct OriginalSource {
    pub url: String,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct RenditionSource {
    pub url: Option<String>,
    pub ready: bool,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct AdaptiveSource {
    pub url: Option<String>,
    pub ready: bool,
    pub variants: Vec<serde_json::Value>,
}

/// Working set of renditions for one video. The original is always playable;
/// the transcoded renditions become playable only once the server reports
/// them ready.
#[derive(Debug, Clone, Default)]
pub struct VideoSourceSet {
    pub original: OriginalSource,
    pub fast: RenditionSource,
    pub hd: RenditionSource,
    pub hls: AdaptiveSource,
}

impl VideoSourceSet {
    pub fn new(original_url: String) -> Self {
        Self {
            original: OriginalSource {
                url: original_url,
                size: None,
            },
            ..Default::default()
        }
    }

    /// Merge a sources response field by field. A response never clears a
    /// previously learned URL; transcode sizes are overwritten each time
    /// (the server stops reporting them while re-encoding).
    pub fn apply(&mut self, data: &SourcesResponse) {
        if let Some(original) = &data.original {
            if let Some(url) = original.url.as_deref().filter(|u| !u.is_empty()) {
                self.original.url = url.to_string();
            }
            if let Some(size) = original.size.filter(|s| *s > 0) {
                self.original.size = Some(size);
            }
        }
        if let Some(fast) = &data.fast {
            if let Some(url) = fast.url.as_deref().filter(|u| !u.is_empty()) {
                self.fast.url = Some(url.to_string());
            }
            if let Some(ready) = fast.ready {
                self.fast.ready = ready;
            }
            self.fast.size = fast.size.filter(|s| *s > 0);
        }
        if let Some(hd) = &data.hd {
            if let Some(url) = hd.url.as_deref().filter(|u| !u.is_empty()) {
                self.hd.url = Some(url.to_string());
            }
            if let Some(ready) = hd.ready {
                self.hd.ready = ready;
            }
            self.hd.size = hd.size.filter(|s| *s > 0);
        }
        if let Some(hls) = &data.hls {
            if let Some(url) = hls.url.as_deref().filter(|u| !u.is_empty()) {
                self.hls.url = Some(url.to_string());
            }
            if let Some(ready) = hls.ready {
                self.hls.ready = ready;
            }
            if let Some(variants) = &hls.variants {
                self.hls.variants = variants.clone();
            }
        }
    }

    pub fn is_ready(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Original => true,
            SourceKind::Fast => self.fast.ready,
            SourceKind::Hd => self.hd.ready,
            SourceKind::Hls => self.hls.ready,
        }
    }

    pub fn url_for(&self, kind: SourceKind) -> Option<&str> {
        match kind {
            SourceKind::Original => Some(self.original.url.as_str()),
            SourceKind::Fast => self.fast.url.as_deref(),
            SourceKind::Hd => self.hd.url.as_deref(),
            SourceKind::Hls => self.hls.url.as_deref(),
        }
    }

    /// Resolve the most-preferred ready rendition reachable from `desired`
    /// without using `avoid`, falling through a fixed preference chain that
    /// always ends at the original.
    pub fn pick_playable(
        &self,
        desired: SourceKind,
        avoid: Option<SourceKind>,
        adaptive_supported: bool,
    ) -> SourceKind {
        let allowed = |kind: SourceKind| avoid != Some(kind);

        match desired {
            SourceKind::Hls => {
                if allowed(SourceKind::Hls) && self.hls.ready && adaptive_supported {
                    return SourceKind::Hls;
                }
                if allowed(SourceKind::Hd) && self.hd.ready {
                    return SourceKind::Hd;
                }
                if allowed(SourceKind::Fast) && self.fast.ready {
                    return SourceKind::Fast;
                }
                SourceKind::Original
            }
            SourceKind::Hd => {
                if allowed(SourceKind::Hd) && self.hd.ready {
                    return SourceKind::Hd;
                }
                if allowed(SourceKind::Fast) && self.fast.ready {
                    return SourceKind::Fast;
                }
                SourceKind::Original
            }
            SourceKind::Fast => {
                if allowed(SourceKind::Fast) && self.fast.ready {
                    return SourceKind::Fast;
                }
                if allowed(SourceKind::Hd) && self.hd.ready {
                    return SourceKind::Hd;
                }
                SourceKind::Original
            }
            SourceKind::Original => {
                if allowed(SourceKind::Hd) && self.hd.ready {
                    return SourceKind::Hd;
                }
                if allowed(SourceKind::Fast) && self.fast.ready {
                    return SourceKind::Fast;
                }
                SourceKind::Original
            }
        }
    }
}

/// Percent-encode each segment of a relative path, keeping the separators.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Endpoint addresses for one shared file.
#[derive(Debug, Clone)]
pub struct ShareLocator {
    pub base_url: String,
    pub share: String,
    pub file_path: String,
}

impl ShareLocator {
    pub fn sources_api_url(&self) -> String {
        format!(
            "{}/api/share/{}/video-sources/{}",
            self.base_url,
            self.share,
            encode_path(&self.file_path)
        )
    }

    /// Default inline URL of the original rendition, playable before any
    /// sources response arrives.
    pub fn inline_url(&self) -> String {
        format!(
            "{}/api/public/dl/{}/{}?inline=true",
            self.base_url,
            self.share,
            encode_path(&self.file_path)
        )
    }

    pub fn download_url(&self) -> String {
        format!(
            "{}/api/share/{}/file/{}?download=1",
            self.base_url,
            self.share,
            encode_path(&self.file_path)
        )
    }
}

#[async_trait]
pub trait SourcesApi: Send + Sync {
    /// Fetch the readiness document, optionally requesting preparation of
    /// one or more targets.
    async fn fetch_sources(&self, prepare: &[PrepareTarget])
        -> Result<SourcesResponse, PlayerError>;
}

/// reqwest-backed sources endpoint client.
pub struct HttpSourcesApi {
    client: reqwest::Client,
    locator: ShareLocator,
}

impl HttpSourcesApi {
    pub fn new(client: reqwest::Client, locator: ShareLocator) -> Self {
        Self { client, locator }
    }
}

#[async_trait]
impl SourcesApi for HttpSourcesApi {
    async fn fetch_sources(
        &self,
        prepare: &[PrepareTarget],
    ) -> Result<SourcesResponse, PlayerError> {
        let base = self.locator.sources_api_url();
        let sep = if base.contains('?') { '&' } else { '?' };
        let url = format!("{base}{sep}t={}", chrono::Utc::now().timestamp_millis());

        let request = if prepare.is_empty() {
            self.client.get(&url)
        } else {
            let targets: Vec<&str> = prepare.iter().map(PrepareTarget::as_str).collect();
            self.client
                .post(&url)
                .json(&serde_json::json!({ "prepare": targets }))
        };

        let response = request.timeout(SOURCES_FETCH_TIMEOUT).send().await?;
        if !response.status().is_success() {
            return Err(PlayerError::InvalidResponseStatus {
                status: response.status(),
            });
        }
        Ok(response.json::<SourcesResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_with(fast: bool, hd: bool, hls: bool) -> VideoSourceSet {
        let mut sources = VideoSourceSet::new("/orig".to_string());
        sources.fast = RenditionSource {
            url: Some("/fast".into()),
            ready: fast,
            size: None,
        };
        sources.hd = RenditionSource {
            url: Some("/hd".into()),
            ready: hd,
            size: None,
        };
        sources.hls = AdaptiveSource {
            url: Some("/hls".into()),
            ready: hls,
            variants: vec![],
        };
        sources
    }

    #[test]
    fn test_pick_never_returns_unready_or_avoided() {
        let kinds = [
            SourceKind::Original,
            SourceKind::Fast,
            SourceKind::Hd,
            SourceKind::Hls,
        ];
        for mask in 0..8u8 {
            let sources = set_with(mask & 1 != 0, mask & 2 != 0, mask & 4 != 0);
            for desired in kinds {
                for avoid in kinds.iter().copied().map(Some).chain([None]) {
                    let picked = sources.pick_playable(desired, avoid, true);
                    assert!(
                        sources.is_ready(picked),
                        "picked unready {picked:?} for desired {desired:?} mask {mask}"
                    );
                    if picked != SourceKind::Original {
                        assert_ne!(Some(picked), avoid);
                    }
                }
            }
        }
    }

    #[test]
    fn test_pick_preference_chains() {
        let all = set_with(true, true, true);
        assert_eq!(
            all.pick_playable(SourceKind::Hls, None, true),
            SourceKind::Hls
        );
        assert_eq!(
            all.pick_playable(SourceKind::Hls, None, false),
            SourceKind::Hd
        );
        assert_eq!(
            all.pick_playable(SourceKind::Hls, Some(SourceKind::Hls), true),
            SourceKind::Hd
        );
        assert_eq!(
            all.pick_playable(SourceKind::Fast, Some(SourceKind::Fast), true),
            SourceKind::Hd
        );
        assert_eq!(
            all.pick_playable(SourceKind::Hd, Some(SourceKind::Hd), true),
            SourceKind::Fast
        );

        let none = set_with(false, false, false);
        for desired in [SourceKind::Hls, SourceKind::Hd, SourceKind::Fast] {
            assert_eq!(none.pick_playable(desired, None, true), SourceKind::Original);
        }
    }

    #[test]
    fn test_apply_merges_without_clearing_urls() {
        let mut sources = VideoSourceSet::new("/orig".to_string());
        sources.apply(&SourcesResponse {
            fast: Some(RenditionInfo {
                url: Some("/fast".into()),
                ready: Some(false),
                size: Some(100),
            }),
            ..Default::default()
        });
        assert_eq!(sources.fast.url.as_deref(), Some("/fast"));
        assert!(!sources.fast.ready);
        assert_eq!(sources.fast.size, Some(100));

        // A later response without url/size keeps the url but drops the size.
        sources.apply(&SourcesResponse {
            fast: Some(RenditionInfo {
                url: None,
                ready: Some(true),
                size: None,
            }),
            ..Default::default()
        });
        assert_eq!(sources.fast.url.as_deref(), Some("/fast"));
        assert!(sources.fast.ready);
        assert_eq!(sources.fast.size, None);
    }

    #[test]
    fn test_encode_path_keeps_separators() {
        assert_eq!(encode_path("a b/c.mp4"), "a%20b/c.mp4");
        assert_eq!(encode_path("clip.mp4"), "clip.mp4");
    }

    #[test]
    fn test_share_locator_urls() {
        let locator = ShareLocator {
            base_url: String::new(),
            share: "abc123".into(),
            file_path: "dir/clip.mp4".into(),
        };
        assert_eq!(
            locator.sources_api_url(),
            "/api/share/abc123/video-sources/dir/clip.mp4"
        );
        assert_eq!(
            locator.inline_url(),
            "/api/public/dl/abc123/dir/clip.mp4?inline=true"
        );
        assert_eq!(
            locator.download_url(),
            "/api/share/abc123/file/dir/clip.mp4?download=1"
        );
    }
}

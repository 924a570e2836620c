use crate::cache::{CacheGetOptions, ResponseCache};
use crate::compiler::{SceneDescriptor, SceneError, SceneFailure};
use anyhow::Context;
use reqwest::Method;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_APP_VERSION: &str = "9999999";
const ONE_DAY: Duration = Duration::from_secs(86400);

fn user_agent(app_version: &str) -> String {
    format!(
        "GoveeHome/{app_version} (com.ihoment.GoVeeSensor; build:2; iOS 16.5.0) Alamofire/5.6.4"
    )
}

pub fn from_json<T: serde::de::DeserializeOwned, S: AsRef<[u8]>>(text: S) -> anyhow::Result<T> {
    let text = text.as_ref();
    serde_json_path_to_error::from_slice(text)
        .map_err(|err| anyhow::anyhow!("{err}. Input: {}", String::from_utf8_lossy(text)))
}

/// Fetches the raw light effect library JSON for `sku`.
/// The text is returned as-is so that it can be saved verbatim.
pub async fn fetch_light_effect_library(sku: &str, app_version: &str) -> anyhow::Result<String> {
    let url = format!("https://app2.govee.com/appsku/v1/light-effect-libraries?sku={sku}");
    let response = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?
        .request(Method::GET, &url)
        .header("AppVersion", app_version)
        .header("User-Agent", user_agent(app_version))
        .send()
        .await
        .with_context(|| format!("requesting {url}"))?;

    let status = response.status();
    if !status.is_success() {
        let body_bytes = response.bytes().await.with_context(|| {
            format!(
                "request {url} status {}: {}, and failed to read response body",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )
        })?;
        anyhow::bail!(
            "request {url} status {}: {}. Response body: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            String::from_utf8_lossy(&body_bytes)
        );
    }

    response
        .text()
        .await
        .with_context(|| format!("read {url} response body"))
}

/// Like `fetch_light_effect_library`, but remembers successful
/// responses for a day.
pub async fn get_light_effect_library(
    cache: Option<&ResponseCache>,
    sku: &str,
    app_version: &str,
) -> anyhow::Result<String> {
    let fetch = fetch_light_effect_library(sku, app_version);
    match cache {
        Some(cache) => {
            let key = format!("scenes-{sku}-{app_version}");
            cache
                .get(
                    CacheGetOptions {
                        topic: "light-effect-libraries",
                        key: &key,
                        ttl: ONE_DAY,
                    },
                    fetch,
                )
                .await
        }
        None => fetch.await,
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LightEffectLibraryResponse {
    pub data: LightEffectLibraryCategoryList,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: u32,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LightEffectLibraryCategoryList {
    pub categories: Vec<LightEffectCategory>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LightEffectCategory {
    #[serde(default)]
    pub category_name: String,
    pub scenes: Vec<LightEffectScene>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LightEffectScene {
    pub scene_name: String,
    pub light_effects: Vec<LightEffectEntry>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LightEffectEntry {
    /// base64 encoded
    pub scence_param: String,
    pub scene_code: u16,
    pub scene_type: u32,
}

impl LightEffectScene {
    /// Only the first light effect describes the scene; any others
    /// are ignored.
    pub fn to_descriptor(&self) -> Result<SceneDescriptor, SceneError> {
        let effect = self
            .light_effects
            .first()
            .ok_or_else(|| SceneError::MissingLightEffect {
                name: self.scene_name.clone(),
            })?;
        let effect_type =
            u8::try_from(effect.scene_type).map_err(|_| SceneError::EffectTypeOutOfRange {
                code: effect.scene_code,
                scene_type: effect.scene_type,
            })?;

        Ok(SceneDescriptor {
            name: self.scene_name.clone(),
            code: effect.scene_code,
            effect_type,
            param: effect.scence_param.clone(),
        })
    }
}

#[derive(Debug, Default)]
pub struct ExtractedScenes {
    pub scenes: Vec<SceneDescriptor>,
    pub failures: Vec<SceneFailure>,
}

impl LightEffectLibraryResponse {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        from_json(text).context("parsing light effect library")
    }

    pub fn scene_count(&self) -> usize {
        self.data.categories.iter().map(|c| c.scenes.len()).sum()
    }

    /// Flattens every category into scene descriptors, in catalog order
    pub fn extract_scenes(&self) -> ExtractedScenes {
        let mut result = ExtractedScenes::default();
        for category in &self.data.categories {
            for scene in &category.scenes {
                match scene.to_descriptor() {
                    Ok(desc) => result.scenes.push(desc),
                    Err(error) => {
                        log::warn!(
                            "{}: skipping {:?}: {error}",
                            category.category_name,
                            scene.scene_name
                        );
                        result.failures.push(SceneFailure {
                            name: scene.scene_name.clone(),
                            error,
                        });
                    }
                }
            }
        }
        result
    }
}

/// Re-indents the raw catalog text for saving alongside the output
pub fn pretty_catalog(text: &str) -> anyhow::Result<String> {
    let value: serde_json::Value = from_json(text)?;
    Ok(serde_json::to_string_pretty(&value)?)
}

use crate::packet::HexBytes;
use anyhow::Context;
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use uncased::UncasedStr;

pub const DEFAULT_MULTILINE_PREFIX: u8 = 0xa3;

/// Reshapes a cloud issued payload into the form a particular
/// controller expects locally.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PayloadTransform {
    pub remove_prefix: HexBytes,
    #[serde(default)]
    pub add_prefix: Option<HexBytes>,
    /// Appended to the scene code frame when this transform applies
    #[serde(default)]
    pub mode_suffix: HexBytes,
}

impl PayloadTransform {
    #[allow(dead_code)]
    pub fn new(remove_prefix: &[u8], add_prefix: &[u8], mode_suffix: &[u8]) -> Self {
        Self {
            remove_prefix: remove_prefix.into(),
            add_prefix: if add_prefix.is_empty() {
                None
            } else {
                Some(add_prefix.into())
            },
            mode_suffix: mode_suffix.into(),
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ModelRuleset {
    pub models: Vec<String>,
    #[serde(
        default = "default_multiline_prefix",
        deserialize_with = "single_hex_byte"
    )]
    pub multiline_prefix: u8,
    /// The device must be switched on before it accepts scene data
    #[serde(default)]
    pub on_command: bool,
    /// Checked in order; the first matching transform wins
    #[serde(default)]
    pub transforms: Vec<PayloadTransform>,
}

fn default_multiline_prefix() -> u8 {
    DEFAULT_MULTILINE_PREFIX
}

fn single_hex_byte<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    use serde::de::Error as _;
    let bytes = HexBytes::deserialize(deserializer)?;
    match *bytes {
        [b] => Ok(b),
        _ => Err(D::Error::custom(format!(
            "expected exactly one hex byte, got {bytes:?}"
        ))),
    }
}

impl Default for ModelRuleset {
    fn default() -> Self {
        Self {
            models: vec![],
            multiline_prefix: DEFAULT_MULTILINE_PREFIX,
            on_command: false,
            transforms: vec![],
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ShapedPayload {
    pub payload: Vec<u8>,
    pub mode_suffix: Vec<u8>,
}

impl ModelRuleset {
    pub fn for_models<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            models: models.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_on_command(mut self) -> Self {
        self.on_command = true;
        self
    }

    #[allow(dead_code)]
    pub fn with_transform(mut self, transform: PayloadTransform) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn matches(&self, model: &str) -> bool {
        let model = UncasedStr::new(model);
        self.models.iter().any(|m| UncasedStr::new(m) == model)
    }

    pub fn apply(&self, raw: &[u8]) -> ShapedPayload {
        for transform in &self.transforms {
            if let Some(rest) = raw.strip_prefix(&transform.remove_prefix[..]) {
                let mut payload = match &transform.add_prefix {
                    Some(prefix) => prefix.to_vec(),
                    None => vec![],
                };
                payload.extend_from_slice(rest);
                return ShapedPayload {
                    payload,
                    mode_suffix: transform.mode_suffix.to_vec(),
                };
            }
        }

        ShapedPayload {
            payload: raw.to_vec(),
            mode_suffix: vec![],
        }
    }
}

static DEFAULT_RULESET: Lazy<ModelRuleset> = Lazy::new(ModelRuleset::default);

static BUILTIN_RULES: Lazy<RuleTable> = Lazy::new(load_builtin_rules);

fn load_builtin_rules() -> RuleTable {
    RuleTable::new(vec![
        // This curtain light ignores scene data while it is off
        ModelRuleset::for_models(["H61F2"]).with_on_command(),
    ])
}

/// Ordered list of rulesets; table order decides which ruleset
/// a model gets when it is listed more than once.
#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct RuleTable {
    rulesets: Vec<ModelRuleset>,
}

impl RuleTable {
    pub fn new(rulesets: Vec<ModelRuleset>) -> Self {
        Self { rulesets }
    }

    pub fn builtin() -> &'static RuleTable {
        &*BUILTIN_RULES
    }

    pub fn from_json<S: AsRef<[u8]>>(text: S) -> anyhow::Result<Self> {
        let text = text.as_ref();
        serde_json_path_to_error::from_slice(text).map_err(|err| anyhow::anyhow!("{err}"))
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read(path).with_context(|| format!("reading {path:?}"))?;
        Self::from_json(&data).with_context(|| format!("parsing rule table {path:?}"))
    }

    pub fn resolve(&self, model: &str) -> &ModelRuleset {
        match self.rulesets.iter().find(|r| r.matches(model)) {
            Some(ruleset) => ruleset,
            None => {
                log::debug!("{model} has no model specific rules, using defaults");
                &*DEFAULT_RULESET
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE_RULES: &str = include_str!("../test-data/model-rules.json");

    #[test]
    fn parse_rule_table() {
        let table = RuleTable::from_json(SAMPLE_RULES).unwrap();
        k9::snapshot!(
            &table.rulesets,
            r#"
[
    ModelRuleset {
        models: [
            "H6199",
            "H619A",
        ],
        multiline_prefix: 163,
        on_command: false,
        transforms: [
            PayloadTransform {
                remove_prefix: [02],
                add_prefix: Some(
                    [04],
                ),
                mode_suffix: [01],
            },
            PayloadTransform {
                remove_prefix: [],
                add_prefix: None,
                mode_suffix: [],
            },
        ],
    },
    ModelRuleset {
        models: [
            "H61F2",
        ],
        multiline_prefix: 163,
        on_command: true,
        transforms: [],
    },
    ModelRuleset {
        models: [
            "H61F2",
            "H70B1",
        ],
        multiline_prefix: 164,
        on_command: false,
        transforms: [],
    },
]
"#
        );
    }

    #[test]
    fn bad_rule_table() {
        let err = RuleTable::from_json(r#"[{"models": ["H6199"], "multiline_prefix": "a3a3"}]"#)
            .unwrap_err();
        assert!(
            format!("{err:#}").contains("expected exactly one hex byte"),
            "{err:#}"
        );

        assert!(RuleTable::from_json(r#"[{"multiline_prefix": "a3"}]"#).is_err());
    }

    #[test]
    fn first_matching_ruleset_wins() {
        let table = RuleTable::from_json(SAMPLE_RULES).unwrap();
        let ruleset = table.resolve("H61F2");
        assert!(ruleset.on_command);
        assert_eq!(ruleset.multiline_prefix, 0xa3);

        assert_eq!(table.resolve("H70B1").multiline_prefix, 0xa4);
        assert_eq!(table.resolve("h619a").transforms.len(), 2);
    }

    #[test]
    fn unknown_model_gets_defaults() {
        let table = RuleTable::from_json(SAMPLE_RULES).unwrap();
        let ruleset = table.resolve("H0000");
        assert_eq!(ruleset, &ModelRuleset::default());
        assert_eq!(ruleset.multiline_prefix, 0xa3);
        assert!(!ruleset.on_command);
        assert!(ruleset.transforms.is_empty());

        assert_eq!(RuleTable::default().resolve("H61F2"), &ModelRuleset::default());
    }

    #[test]
    fn builtin_rules() {
        assert!(RuleTable::builtin().resolve("H61F2").on_command);
        assert!(!RuleTable::builtin().resolve("H6072").on_command);
    }

    #[test]
    fn first_matching_transform_wins() {
        let ruleset = ModelRuleset::for_models(["H6199"])
            .with_transform(PayloadTransform::new(&[0x02, 0x00], &[0x09], &[0x01]))
            .with_transform(PayloadTransform::new(&[0x02], &[], &[0x02]))
            .with_transform(PayloadTransform::new(&[], &[0xee], &[0x03]));

        assert_eq!(
            ruleset.apply(&[0x02, 0x00, 0x05]),
            ShapedPayload {
                payload: vec![0x09, 0x05],
                mode_suffix: vec![0x01],
            }
        );
        assert_eq!(
            ruleset.apply(&[0x02, 0x07]),
            ShapedPayload {
                payload: vec![0x07],
                mode_suffix: vec![0x02],
            }
        );
        // an empty prefix matches anything that got this far
        assert_eq!(
            ruleset.apply(&[0x10]),
            ShapedPayload {
                payload: vec![0xee, 0x10],
                mode_suffix: vec![0x03],
            }
        );
    }

    #[test]
    fn no_transform_passes_through() {
        let ruleset = ModelRuleset::for_models(["H6199"])
            .with_transform(PayloadTransform::new(&[0x02], &[0x04], &[0x01]));
        assert_eq!(
            ruleset.apply(&[0x03, 0x02]),
            ShapedPayload {
                payload: vec![0x03, 0x02],
                mode_suffix: vec![],
            }
        );
        assert_eq!(
            ModelRuleset::default().apply(&[]),
            ShapedPayload {
                payload: vec![],
                mode_suffix: vec![],
            }
        );
    }
}

//! Turns scene descriptors into the ordered list of frames that
//! activates each scene over the LAN.

use crate::multi_line::chunk_frames;
use crate::packet::{power_on_frame, scene_code_frame, Frame, PacketError};
use crate::rules::{ModelRuleset, RuleTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One scene as extracted from the light effect library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneDescriptor {
    pub name: String,
    pub code: u16,
    pub effect_type: u8,
    /// base64 encoded, as delivered by the cloud
    pub param: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CompiledScene {
    pub scene_code: u16,
    pub command: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("scene {name:?} has no light effects")]
    MissingLightEffect { name: String },
    #[error("scene {code}: sceneType {scene_type} does not fit in a byte")]
    EffectTypeOutOfRange { code: u16, scene_type: u32 },
    #[error("scene {code}: scenceParam is not valid base64: {err}")]
    MalformedPayload {
        code: u16,
        err: data_encoding::DecodeError,
    },
    #[error("scene {code}: {err}")]
    Packet { code: u16, err: PacketError },
}

#[derive(Debug)]
pub struct SceneFailure {
    pub name: String,
    pub error: SceneError,
}

#[derive(Debug, Default)]
pub struct CompilationResult {
    pub scenes: BTreeMap<String, CompiledScene>,
    /// How many descriptors were offered for compilation
    pub extracted: usize,
    /// Keys that a later scene replaced, in the order it happened
    pub overwritten: Vec<String>,
    pub failures: Vec<SceneFailure>,
}

impl CompilationResult {
    pub fn converted(&self) -> usize {
        self.scenes.len()
    }

    pub fn mismatch(&self) -> usize {
        self.extracted.saturating_sub(self.converted())
    }

    fn insert(&mut self, name: String, scene: CompiledScene) {
        if let Some(previous) = self.scenes.insert(name.clone(), scene) {
            log::trace!("{name} (code {}) replaced by a later scene", previous.scene_code);
            self.overwritten.push(name);
        }
    }

    pub fn to_json_pretty(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(&self.scenes)?)
    }
}

/// Drops C0 and C1 control characters (plus DEL and NBSP) that
/// show up in some catalog scene names.
pub fn sanitize_scene_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(u32::from(*c), 0x00..=0x1f | 0x7f..=0xa0))
        .collect()
}

pub struct SceneCompiler {
    model: String,
    ruleset: ModelRuleset,
}

impl SceneCompiler {
    pub fn new(table: &RuleTable, model: &str) -> Self {
        let ruleset = table.resolve(model).clone();
        log::debug!("{model}: using {ruleset:?}");
        Self {
            model: model.to_string(),
            ruleset,
        }
    }

    pub fn compile_frames(&self, scene: &SceneDescriptor) -> Result<Vec<Frame>, SceneError> {
        let code = scene.code;
        let raw = data_encoding::BASE64
            .decode(scene.param.as_bytes())
            .map_err(|err| SceneError::MalformedPayload { code, err })?;

        let shaped = self.ruleset.apply(&raw);
        let packet_err = |err| SceneError::Packet { code, err };

        let mut frames = vec![];
        if self.ruleset.on_command {
            frames.push(power_on_frame());
        }
        frames.extend(
            chunk_frames(
                &shaped.payload,
                scene.effect_type,
                self.ruleset.multiline_prefix,
            )
            .map_err(packet_err)?,
        );
        frames.push(scene_code_frame(code, &shaped.mode_suffix).map_err(packet_err)?);

        Ok(frames)
    }

    pub fn compile_scene(&self, scene: &SceneDescriptor) -> Result<CompiledScene, SceneError> {
        Ok(CompiledScene {
            scene_code: scene.code,
            command: self
                .compile_frames(scene)?
                .iter()
                .map(Frame::base64)
                .collect(),
        })
    }

    pub fn compile(&self, scenes: &[SceneDescriptor]) -> CompilationResult {
        let mut result = CompilationResult {
            extracted: scenes.len(),
            ..CompilationResult::default()
        };

        for scene in scenes {
            match self.compile_scene(scene) {
                Ok(compiled) => result.insert(sanitize_scene_name(&scene.name), compiled),
                Err(error) => {
                    log::error!("{}: skipping {:?}: {error}", self.model, scene.name);
                    result.failures.push(SceneFailure {
                        name: scene.name.clone(),
                        error,
                    });
                }
            }
        }

        if result.converted() != result.extracted {
            log::warn!(
                "{}: converted {} of {} scenes",
                self.model,
                result.converted(),
                result.extracted
            );
            if !result.overwritten.is_empty() {
                log::warn!(
                    "Duplicate scene names, later entries replaced earlier ones: {}",
                    result.overwritten.join(", ")
                );
            }
        }

        result
    }
}

use crate::catalog::from_json;
use crate::multi_line::reassemble;
use crate::packet::{Frame, HexBytes, LanPacket};
use crate::rules::DEFAULT_MULTILINE_PREFIX;
use anyhow::Context;
use clap_num::maybe_hex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(clap::Parser, Debug)]
pub struct InspectCommand {
    /// A govee_<SKU>_scenes.json document produced by `generate`
    #[arg(long, short)]
    file: PathBuf,

    /// Only inspect the scene with this name
    #[arg(long)]
    scene: Option<String>,

    /// The header byte of the multi-line frames, eg: 0xa3
    #[arg(long, default_value_t = DEFAULT_MULTILINE_PREFIX, value_parser=maybe_hex::<u8>)]
    multiline_prefix: u8,
}

/// Frames are validated for length and checksum as they are parsed
#[derive(Deserialize, Debug)]
struct SceneCommands {
    scene_code: u16,
    command: Vec<Frame>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct SceneReport {
    pub power_on: bool,
    pub lines: usize,
    pub effect_type: u8,
    pub data: HexBytes,
    pub mode_suffix: HexBytes,
}

/// Checks that `frames` has the shape of a compiled scene and
/// recovers the multi-line payload.
pub fn describe_scene(
    frames: &[Frame],
    scene_code: u16,
    multiline_prefix: u8,
) -> anyhow::Result<SceneReport> {
    let (power_on, frames) = match frames {
        [first, rest @ ..]
            if LanPacket::classify(first, multiline_prefix) == LanPacket::SetPower(true) =>
        {
            (true, rest)
        }
        _ => (false, frames),
    };

    let Some((last, lines)) = frames.split_last() else {
        anyhow::bail!("no frames");
    };

    let mode_suffix = match LanPacket::classify(last, multiline_prefix) {
        LanPacket::SetSceneCode { code, mode_suffix } => {
            anyhow::ensure!(
                code == scene_code,
                "scene code frame activates {code}, but the scene is {scene_code}"
            );
            mode_suffix
        }
        other => anyhow::bail!("final frame is not a scene code frame: {other:?}"),
    };

    let payload = reassemble(lines, multiline_prefix)?;

    Ok(SceneReport {
        power_on,
        lines: lines.len(),
        effect_type: payload.effect_type,
        data: payload.data.into(),
        mode_suffix,
    })
}

impl InspectCommand {
    pub async fn run(&self, _args: &crate::Args) -> anyhow::Result<()> {
        let text = std::fs::read_to_string(&self.file)
            .with_context(|| format!("reading {:?}", self.file))?;
        let doc: BTreeMap<String, SceneCommands> =
            from_json(&text).with_context(|| format!("parsing {:?}", self.file))?;

        let scenes: Vec<_> = match &self.scene {
            Some(name) => {
                let scene = doc
                    .get_key_value(name.as_str())
                    .ok_or_else(|| anyhow::anyhow!("{:?} has no scene named {name:?}", self.file))?;
                vec![scene]
            }
            None => doc.iter().collect(),
        };

        let mut failed = 0;
        for (name, scene) in scenes {
            match describe_scene(&scene.command, scene.scene_code, self.multiline_prefix) {
                Ok(report) => {
                    println!(
                        "{name}: code {} type {} lines {}{}",
                        scene.scene_code,
                        report.effect_type,
                        report.lines,
                        if report.power_on { " (power on)" } else { "" }
                    );
                    if !report.mode_suffix.is_empty() {
                        println!("  mode suffix {:?}", report.mode_suffix);
                    }
                    log::debug!("{name}: {:?}", report.data);
                }
                Err(err) => {
                    log::error!("{name}: {err:#}");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            anyhow::bail!("{failed} scenes are malformed");
        }
        Ok(())
    }
}

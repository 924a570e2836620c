use crate::cache::{default_cache_dir, ResponseCache};
use crate::catalog::{
    get_light_effect_library, pretty_catalog, LightEffectLibraryResponse, DEFAULT_APP_VERSION,
};
use crate::compiler::SceneCompiler;
use crate::opt_env_var;
use crate::rules::RuleTable;
use anyhow::Context;
use std::path::{Path, PathBuf};

#[derive(clap::Parser, Debug)]
pub struct GenerateCommand {
    /// Your Govee device SKU (model), eg: H61F2.
    /// If not passed here, it will be read from
    /// the GOVEE_SKU environment variable.
    #[arg(long, short)]
    sku: Option<String>,

    /// The GoveeHome app version to present to the API.
    /// If not passed here, it will be read from the
    /// GOVEE_APP_VERSION environment variable, falling back
    /// to 9999999.
    #[arg(long, short)]
    app_version: Option<String>,

    /// Load the light effect library JSON from this file instead
    /// of requesting it from Govee.
    #[arg(long, short)]
    load: Option<PathBuf>,

    /// Save the light effect library as govee_<SKU>_api_data.json
    /// in the output directory. Has no effect together with --load.
    #[arg(long)]
    save_api_data: bool,

    /// A JSON model rule table to use in place of the built-in one.
    /// If not passed here, it will be read from the
    /// GOVEE_SCENE_RULES environment variable.
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Where to write govee_<SKU>_scenes.json
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Always request the light effect library, even when a
    /// recent copy is cached.
    #[arg(long)]
    no_cache: bool,
}

impl GenerateCommand {
    fn sku(&self) -> anyhow::Result<String> {
        let sku = match &self.sku {
            Some(sku) => Some(sku.to_string()),
            None => opt_env_var("GOVEE_SKU")?,
        };
        let sku = sku.ok_or_else(|| {
            anyhow::anyhow!(
                "Please specify the device SKU either via the \
                --sku parameter or by setting $GOVEE_SKU"
            )
        })?;
        Ok(sku.trim().to_ascii_uppercase())
    }

    fn app_version(&self) -> anyhow::Result<String> {
        match &self.app_version {
            Some(v) => Ok(v.to_string()),
            None => Ok(opt_env_var("GOVEE_APP_VERSION")?
                .unwrap_or_else(|| DEFAULT_APP_VERSION.to_string())),
        }
    }

    fn rules_path(&self) -> anyhow::Result<Option<PathBuf>> {
        match &self.rules {
            Some(path) => Ok(Some(path.clone())),
            None => opt_env_var("GOVEE_SCENE_RULES"),
        }
    }

    async fn library_text(&self, args: &crate::Args, sku: &str) -> anyhow::Result<String> {
        if let Some(path) = &self.load {
            log::info!("Loading data for {sku} from {path:?}");
            return std::fs::read_to_string(path).with_context(|| format!("reading {path:?}"));
        }

        let cache = if self.no_cache {
            None
        } else {
            let dir = match &args.cache_dir {
                Some(dir) => dir.clone(),
                None => default_cache_dir()?,
            };
            match ResponseCache::open(&dir) {
                Ok(cache) => Some(cache),
                Err(err) => {
                    log::warn!("Continuing without a cache: {err:#}");
                    None
                }
            }
        };

        log::info!("Requesting scenes data for {sku}");
        let app_version = self.app_version()?;
        let text = get_light_effect_library(cache.as_ref(), sku, &app_version).await?;

        if self.save_api_data {
            let save_file = self.output_dir.join(format!("govee_{sku}_api_data.json"));
            write_file(&save_file, &pretty_catalog(&text)?)?;
            log::info!("Saved the API response data as {save_file:?}");
        }

        Ok(text)
    }

    pub async fn run(&self, args: &crate::Args) -> anyhow::Result<()> {
        let sku = self.sku()?;

        let loaded_rules;
        let rules = match self.rules_path()? {
            Some(path) => {
                loaded_rules = RuleTable::load(&path)?;
                &loaded_rules
            }
            None => RuleTable::builtin(),
        };

        let text = self.library_text(args, &sku).await?;
        let library = LightEffectLibraryResponse::parse(&text)?;
        if library.status != 200 {
            log::warn!(
                "Light effect library status {}: {}",
                library.status,
                library.message
            );
        }

        let extracted = library.extract_scenes();
        log::info!("Extracted {} scenes.", library.scene_count());

        let compiler = SceneCompiler::new(rules, &sku);
        let result = compiler.compile(&extracted.scenes);

        let skipped: Vec<String> = extracted
            .failures
            .iter()
            .chain(result.failures.iter())
            .map(|f| format!("{:?} ({})", f.name, f.error))
            .collect();
        if !skipped.is_empty() {
            log::warn!("Could not convert: {}", skipped.join(", "));
        }
        if result.mismatch() > result.failures.len() {
            log::info!(
                "{} scenes share a name with a later scene and were replaced",
                result.mismatch() - result.failures.len()
            );
        }

        let save_file = self.output_dir.join(format!("govee_{sku}_scenes.json"));
        write_file(&save_file, &result.to_json_pretty()?)?;
        log::info!("Saved {} scenes to {save_file:?}", result.converted());

        Ok(())
    }
}

fn write_file(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {dir:?}"))?;
    }
    std::fs::write(path, contents).with_context(|| format!("writing {path:?}"))
}

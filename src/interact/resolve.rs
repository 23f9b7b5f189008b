//! Interactive resource resolution
//!
//! Works out which resource string belongs to an instrument role, using, in
//! order: a configured override, the on-disk cache, or the operator. When the
//! operator does not know which port is which, the instrument is unplugged
//! and the resource that vanished is reported.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::info;

use super::cache::ResourceCache;
use super::prompt::Prompt;
use crate::config::ToolsConfig;
use crate::error::{AppResult, ToolsError};
use crate::hardware::ResourceManager;

/// How to resolve one role
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOptions {
    /// Name the resource is cached under; `None` disables caching
    pub role: Option<String>,
    pub cache_path: PathBuf,
    /// Use a cached assignment without asking
    pub skip_confirm: bool,
    /// Fixed role -> resource assignments
    pub overrides: BTreeMap<String, String>,
}

impl ResolveOptions {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            cache_path: PathBuf::from(".measurement_tools"),
            skip_confirm: true,
            overrides: BTreeMap::new(),
        }
    }

    /// Options for `role` taken from the `cache` and `resources` config sections
    pub fn from_config(config: &ToolsConfig, role: impl Into<String>) -> Self {
        let role = role.into();
        let mut overrides = BTreeMap::new();
        if let Some(resource) = config.resource_for(&role) {
            overrides.insert(role.clone(), resource.to_string());
        }
        Self {
            role: Some(role),
            cache_path: config.cache.path.clone(),
            skip_confirm: config.cache.skip_confirm,
            overrides,
        }
    }
}

/// Find the resource string for `options.role`.
pub async fn resolve_resource(
    rm: &ResourceManager,
    prompt: &mut dyn Prompt,
    options: &ResolveOptions,
) -> AppResult<String> {
    if let Some(role) = &options.role {
        if let Some(resource) = options.overrides.get(role) {
            info!("Using configured resource {} for {}", resource, role);
            return Ok(resource.clone());
        }
    }

    let mut offer_cached = true;
    loop {
        let cache = ResourceCache::load(&options.cache_path)?;

        if offer_cached {
            offer_cached = false;
            if let (Some(role), Some(cache)) = (&options.role, &cache) {
                if let Some(id) = cache.get(role) {
                    prompt.message(&format!("Found previous assignment of {}->{}", role, id))?;
                    if options.skip_confirm
                        || prompt.confirm("Use this VISA ID?", Some(true)).await?
                    {
                        return Ok(id.to_string());
                    }
                }
            }
        }

        let in_use = rm.list_opened();
        if !in_use.is_empty() {
            prompt.message(&format!("Note: ignoring {:?} since already in use.", in_use))?;
        }
        let candidates: Vec<String> = rm
            .list_resources()
            .await?
            .into_iter()
            .filter(|id| !in_use.contains(id))
            .collect();

        let chosen = match candidates.as_slice() {
            [] => return Err(ToolsError::NoInstrumentFound),
            [only] => {
                prompt.message(&format!(
                    "Only one unopened VISA instrument found: {}.",
                    only
                ))?;
                only.clone()
            }
            _ => {
                let labels: Vec<String> = candidates
                    .iter()
                    .map(|id| match cache.as_ref().and_then(|c| c.role_for(id)) {
                        Some(hint) => format!("{} (cached: <- {} )", id, hint),
                        None => id.clone(),
                    })
                    .collect();
                let choice = prompt.option_list(
                    &labels,
                    "Choose Instrument VISA ID (press <enter> if you don't know):",
                    Some(""),
                )
                .await?;
                match choice {
                    Some(idx) => candidates[idx].clone(),
                    None => {
                        detect_unplugged(rm, prompt, &candidates, cache.as_ref()).await?;
                        continue;
                    }
                }
            }
        };

        remember(prompt, options, cache, &chosen).await?;
        return Ok(chosen);
    }
}

async fn detect_unplugged(
    rm: &ResourceManager,
    prompt: &mut dyn Prompt,
    candidates: &[String],
    cache: Option<&ResourceCache>,
) -> AppResult<()> {
    prompt
        .wait_for_enter("Determining ID automatically. Unplug Instrument and press <enter>:")
        .await?;

    let remaining: BTreeSet<String> = rm.list_resources().await?.into_iter().collect();
    let vanished: Vec<&String> = candidates
        .iter()
        .filter(|id| !remaining.contains(*id))
        .collect();
    prompt.message(&format!("These IDs were disconnected: {:?}", vanished))?;

    if let Some(cache) = cache {
        prompt.message("The following assignments were found in the cache:")?;
        for (role, id) in cache.entries() {
            prompt.message(&format!("  {}: {}", role, id))?;
        }
    }

    prompt
        .wait_for_enter("Plug Instrument back in and press <enter>:")
        .await
}

async fn remember(
    prompt: &mut dyn Prompt,
    options: &ResolveOptions,
    cache: Option<ResourceCache>,
    chosen: &str,
) -> AppResult<()> {
    let Some(role) = &options.role else {
        return Ok(());
    };
    match cache {
        Some(mut cache) => {
            let question = format!("Remember {}->{} in the future?", role, chosen);
            if prompt.confirm(&question, Some(true)).await? {
                cache.insert(role.clone(), chosen);
                cache.save()?;
            }
        }
        None => {
            let question = format!(
                "Create cache file {} to remember device ID in the future?",
                options.cache_path.display()
            );
            if prompt.confirm(&question, Some(true)).await? {
                let mut cache = ResourceCache::new(&options.cache_path);
                cache.insert(role.clone(), chosen);
                cache.save()?;
            }
        }
    }
    Ok(())
}

//! Build plugins.
//!
//! Plugins are registered in order and declare the hook points they take
//! part in. Hooks run at fixed phase boundaries:
//!
//! - [`HookPoint::BuildStart`] before scanning, in registration order.
//! - [`HookPoint::Resolve`] for every import specifier; the first plugin to
//!   return an id wins, otherwise the specifier is joined lexically onto
//!   the importer's directory.
//! - [`HookPoint::Generate`] after every transform; returned chunks are
//!   concatenated in registration order and appended to the output.
//! - [`HookPoint::BuildEnd`] with the finished report.

use std::sync::Arc;

use kiln_common::{ContentHash, ModuleId};

use crate::report::BuildReport;

/// A phase boundary at which plugins are invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// A generation is starting.
    BuildStart,
    /// An import specifier needs resolving.
    Resolve,
    /// A module's output was produced.
    Generate,
    /// A generation finished.
    BuildEnd,
}

/// A build plugin.
///
/// Only the hooks listed by [`hooks`](Plugin::hooks) are called. `Resolve`
/// and `Generate` run on worker threads.
pub trait Plugin: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Hook points this plugin implements.
    fn hooks(&self) -> &[HookPoint];

    /// Fingerprint of everything about the plugin that affects output.
    ///
    /// Folded into every module's config hash. Defaults to the name.
    fn fingerprint(&self) -> ContentHash {
        ContentHash::from_bytes(self.name().as_bytes())
    }

    /// Called when a generation starts.
    fn build_start(&self, _generation: u64) {}

    /// Resolves `specifier` imported by `importer`.
    fn resolve(&self, _importer: &ModuleId, _specifier: &str) -> Option<ModuleId> {
        None
    }

    /// Returns extra output to append to `module`'s output.
    fn generate(&self, _module: &ModuleId, _output: &[u8]) -> Option<Vec<u8>> {
        None
    }

    /// Called with the finished report.
    fn build_end(&self, _report: &BuildReport) {}
}

/// Ordered set of registered plugins.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a plugin.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Returns `true` if no plugin is registered.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    fn at(&self, hook: HookPoint) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.plugins.iter().filter(move |p| p.hooks().contains(&hook))
    }

    /// Combined fingerprint of all plugins, in registration order.
    pub fn fingerprint(&self) -> ContentHash {
        let parts: Vec<ContentHash> = self.plugins.iter().map(|p| p.fingerprint()).collect();
        ContentHash::combine(&parts)
    }

    /// Runs the `BuildStart` hooks.
    pub fn build_start(&self, generation: u64) {
        for plugin in self.at(HookPoint::BuildStart) {
            plugin.build_start(generation);
        }
    }

    /// Resolves a specifier; the first plugin returning an id wins.
    pub fn resolve(&self, importer: &ModuleId, specifier: &str) -> ModuleId {
        self.at(HookPoint::Resolve)
            .find_map(|p| p.resolve(importer, specifier))
            .unwrap_or_else(|| importer.resolve(specifier))
    }

    /// Resolves every specifier of `importer`, in order.
    pub fn resolve_all(&self, importer: &ModuleId, specifiers: &[String]) -> Vec<ModuleId> {
        specifiers
            .iter()
            .map(|s| self.resolve(importer, s))
            .collect()
    }

    /// Concatenates the `Generate` chunks for `module`.
    pub fn generate(&self, module: &ModuleId, output: &[u8]) -> Vec<u8> {
        let mut extra = Vec::new();
        for plugin in self.at(HookPoint::Generate) {
            if let Some(chunk) = plugin.generate(module, output) {
                extra.extend_from_slice(&chunk);
            }
        }
        extra
    }

    /// Runs the `BuildEnd` hooks.
    pub fn build_end(&self, report: &BuildReport) {
        for plugin in self.at(HookPoint::BuildEnd) {
            plugin.build_end(report);
        }
    }
}

//! Dispatch from a managed kind to the generators that expand it
//!
//! Each resource family (service accounts, deployments, certificates, ...) is
//! a `Generator` holding one function per managed kind it supports. The
//! `GeneratorRegistry` owns every family plus, per managed kind, the ordered
//! list of families to run. It is built once at startup and shared read-only.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{Error, GenerationError, Result};

use super::context::ReconciliationContext;
use super::managed::ManagedKind;

/// Generation function for one family and one managed kind
pub type GenerateFn = fn(&mut ReconciliationContext<'_>) -> std::result::Result<(), GenerationError>;

/// One resource family's dispatch table
#[derive(Clone, Debug)]
pub struct Generator {
    family: &'static str,
    functions: HashMap<ManagedKind, GenerateFn>,
}

impl Generator {
    pub fn new(family: &'static str) -> Self {
        Self {
            family,
            functions: HashMap::new(),
        }
    }

    /// Associate a managed kind with its generation function
    pub fn register(mut self, kind: ManagedKind, function: GenerateFn) -> Self {
        self.functions.insert(kind, function);
        self
    }

    pub fn family(&self) -> &'static str {
        self.family
    }

    pub fn supports(&self, kind: ManagedKind) -> bool {
        self.functions.contains_key(&kind)
    }

    /// Invoke the function registered for the context's managed kind
    pub fn generate(&self, ctx: &mut ReconciliationContext<'_>) -> Result<()> {
        let kind = ctx.owner().kind();
        let function = self.functions.get(&kind).ok_or_else(|| Error::UnsupportedKind {
            family: self.family.to_string(),
            kind,
        })?;

        function(ctx).map_err(|source| Error::Generation {
            family: self.family.to_string(),
            source,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct GeneratorRegistry {
    families: HashMap<&'static str, Generator>,
    pipelines: HashMap<ManagedKind, Vec<&'static str>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generator(mut self, generator: Generator) -> Self {
        self.families.insert(generator.family(), generator);
        self
    }

    /// Set the ordered families run for a managed kind
    pub fn with_pipeline(mut self, kind: ManagedKind, families: &[&'static str]) -> Self {
        self.pipelines.insert(kind, families.to_vec());
        self
    }

    pub fn pipeline(&self, kind: ManagedKind) -> &[&'static str] {
        self.pipelines.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    /// Check that every pipeline entry names a family with a function for that kind
    pub fn validate(&self) -> Result<()> {
        for (kind, families) in &self.pipelines {
            for family in families {
                match self.families.get(family) {
                    None => {
                        return Err(Error::ConfigError(format!(
                            "pipeline for {kind} names unknown family {family}"
                        )))
                    }
                    Some(generator) if !generator.supports(*kind) => {
                        return Err(Error::UnsupportedKind {
                            family: family.to_string(),
                            kind: *kind,
                        })
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Run the pipeline for the context's managed kind
    ///
    /// Stops at the first failing family; children added before the failure
    /// stay in the context but the pass is abandoned by the caller.
    pub fn run(&self, ctx: &mut ReconciliationContext<'_>) -> Result<()> {
        let kind = ctx.owner().kind();
        for family in self.pipeline(kind) {
            let generator = self.families.get(family).ok_or_else(|| Error::UnsupportedKind {
                family: family.to_string(),
                kind,
            })?;
            let before = ctx.resources().len();
            generator.generate(ctx)?;
            debug!(
                family,
                added = ctx.resources().len() - before,
                "Generator family completed"
            );
        }
        Ok(())
    }
}

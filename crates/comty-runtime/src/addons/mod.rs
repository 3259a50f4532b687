//! Addons: third-party extensions contributing to platform operations.
//!
//! Every operation is a type implementing [`Operation`]. An addon implements
//! [`Provides<Op>`] for each operation it serves and lists them in
//! [`Addon::declare`]; the [`AddonRegistry`] indexes providers by operation
//! and [`process`] fans an operation out to all of them.

pub mod merge;
pub mod operations;
mod pipeline;
mod registry;

pub use merge::{ItemGroup, MergeResult, sort_by_key_desc, split_limit, standard_list_merge};
pub use operations::{
    GetMyLibrary, GetReleaseData, LibraryQuery, ReleaseQuery, Search, SearchQuery, SortOrder,
};
pub use pipeline::process;
pub use registry::AddonRegistry;

use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;

/// A named operation with typed arguments and output.
pub trait Operation: Send + Sync + 'static {
    const NAME: &'static str;
    type Args: Send + Sync;
    type Output: Send + 'static;
}

/// Implemented by addons for each operation they serve.
#[async_trait]
pub trait Provides<Op: Operation>: Send + Sync {
    async fn invoke(&self, args: &Op::Args) -> Result<Op::Output>;
}

/// An extension object.
pub trait Addon: Send + Sync + 'static {
    /// Register the operations this addon provides.
    fn declare(self: Arc<Self>, capabilities: &mut Capabilities);
}

/// Operations declared by one addon.
#[derive(Default)]
pub struct Capabilities {
    providers: HashMap<TypeId, (&'static str, Box<dyn Any + Send + Sync>)>,
}

impl Capabilities {
    pub fn provide<Op: Operation>(&mut self, provider: Arc<dyn Provides<Op>>) -> &mut Self {
        let provider: Box<dyn Any + Send + Sync> = Box::new(provider);
        self.providers.insert(TypeId::of::<Op>(), (Op::NAME, provider));
        self
    }

    pub fn get<Op: Operation>(&self) -> Option<Arc<dyn Provides<Op>>> {
        self.providers
            .get(&TypeId::of::<Op>())
            .and_then(|(_, provider)| provider.downcast_ref::<Arc<dyn Provides<Op>>>())
            .cloned()
    }

    pub fn supports<Op: Operation>(&self) -> bool {
        self.providers.contains_key(&TypeId::of::<Op>())
    }

    /// Names of the declared operations, sorted.
    pub fn operations(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.providers.values().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.operations()).finish()
    }
}

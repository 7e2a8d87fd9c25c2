use serde::{Deserialize, Serialize};
use shadowvm_arch_x86::PagingMode;

/// Configuration of a [`ShadowPaging`] instance.
///
/// [`ShadowPaging`]: crate::ShadowPaging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowPagingConfig {
    /// Format of the identity tables loaded while guest paging is disabled.
    pub passthrough_mode: PagingMode,

    /// Whether a shadow page table unlinked from its directory entry is
    /// returned to the host right away. Tables are unlinked by INVLPG of a
    /// large page and when the guest drops a directory entry without
    /// INVLPG.
    ///
    /// When disabled the table stays owned by its context until the context
    /// is retired.
    pub release_invalidated_tables: bool,

    /// Upper bound on the number of shadow frames a single engine may hold.
    pub max_frames: Option<usize>,
}

impl Default for ShadowPagingConfig {
    fn default() -> Self {
        Self {
            passthrough_mode: PagingMode::Legacy,
            release_invalidated_tables: true,
            max_frames: None,
        }
    }
}

impl ShadowPagingConfig {
    /// Sets the format of the passthrough tables.
    pub fn with_passthrough_mode(self, passthrough_mode: PagingMode) -> Self {
        Self {
            passthrough_mode,
            ..self
        }
    }

    /// Sets whether unlinked shadow tables are released immediately.
    pub fn with_release_invalidated_tables(self, release_invalidated_tables: bool) -> Self {
        Self {
            release_invalidated_tables,
            ..self
        }
    }

    /// Limits the number of shadow frames.
    pub fn with_max_frames(self, max_frames: usize) -> Self {
        Self {
            max_frames: Some(max_frames),
            ..self
        }
    }
}

use shadowvm_arch_x86::{Cr3, PagingMode};
use shadowvm_core::Hpa;

/// Whether the guest currently translates addresses through its own page
/// tables.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryMode {
    /// Guest paging is disabled. The passthrough tables are loaded.
    #[default]
    Physical,

    /// Guest paging is enabled. A shadow of the guest tables is loaded.
    Virtual,
}

/// Per-vCPU shadow paging state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShadowPageState {
    /// Current memory mode.
    pub memory_mode: MemoryMode,

    /// Paging mode the guest has selected.
    pub guest_mode: PagingMode,

    /// Format of the shadow tables.
    pub shadow_mode: PagingMode,

    /// Last value the guest wrote to CR3.
    pub guest_cr3: Cr3,

    /// Top-level shadow table, or `None` when nothing is loaded.
    pub shadow_root: Option<Hpa>,

    /// Whether the guest enabled 4MB pages (CR4.PSE) for 2-level paging.
    pub page_size_extensions: bool,
}

impl ShadowPageState {
    /// Returns the value to load into the physical CR3.
    ///
    /// Zero while no shadow table is loaded.
    pub fn shadow_cr3(&self) -> Cr3 {
        self.shadow_root.map(Cr3::from).unwrap_or_default()
    }
}

/// Extended Feature Enable Register (EFER).
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct MsrEfer(pub u64);

impl MsrEfer {
    /// Checks if Long Mode is enabled (LME bit).
    ///
    /// Long Mode becomes active once paging is turned on as well.
    pub fn long_mode_enable(self) -> bool {
        (self.0 >> 8) & 1 != 0
    }

    /// Checks if Long Mode is active (LMA bit).
    pub fn long_mode_active(self) -> bool {
        (self.0 >> 10) & 1 != 0
    }

    /// Checks if the Execute Disable (NX) feature is enabled.
    pub fn execute_disable(self) -> bool {
        (self.0 >> 11) & 1 != 0
    }
}

impl std::fmt::Debug for MsrEfer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MsrEfer")
            .field("long_mode_enable", &self.long_mode_enable())
            .field("long_mode_active", &self.long_mode_active())
            .field("execute_disable", &self.execute_disable())
            .finish()
    }
}

impl From<u64> for MsrEfer {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<MsrEfer> for u64 {
    fn from(value: MsrEfer) -> Self {
        value.0
    }
}

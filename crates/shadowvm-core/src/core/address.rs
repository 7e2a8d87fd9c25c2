use super::macros::impl_address;

impl_address!(Gfn, u64, "Guest Frame Number");
impl_address!(Pa, u64, "Guest Physical Address");
impl_address!(Va, u64, "Guest Virtual Address");
impl_address!(Hpa, u64, "Host Physical Address");

impl Gfn {
    /// Returns the guest physical address of the first byte of the frame.
    pub const fn to_pa(self, page_shift: u64) -> Pa {
        Pa(self.0 << page_shift)
    }
}

impl Pa {
    /// Returns the guest frame containing the address.
    pub const fn to_gfn(self, page_shift: u64) -> Gfn {
        Gfn(self.0 >> page_shift)
    }
}

impl Hpa {
    /// Checks if the host physical address is NULL.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

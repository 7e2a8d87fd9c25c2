macro_rules! impl_binary_op {
    ($name:ident, $type:ty, $trait:ident, $fn:ident, $assign_trait:ident, $assign_fn:ident, $op:tt) => {
        impl ::std::ops::$trait<$type> for $name {
            type Output = $name;

            fn $fn(self, rhs: $type) -> Self::Output {
                Self(self.0 $op rhs)
            }
        }

        impl ::std::ops::$assign_trait<$type> for $name {
            fn $assign_fn(&mut self, rhs: $type) {
                *self = Self(self.0 $op rhs);
            }
        }
    };
}

macro_rules! impl_address {
    ($name:ident, $type:ty, $doc:expr) => {
        #[doc = concat!("A ", $doc, ".")]
        #[derive(
            Default,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize,
        )]
        pub struct $name(pub $type);

        impl $name {
            #[doc = concat!("Creates a new `", stringify!($name), "`.")]
            pub const fn new(value: $type) -> Self {
                Self(value)
            }

            /// Rounds the value down to a multiple of `alignment`.
            ///
            /// `alignment` must be a power of two.
            pub const fn align_down(self, alignment: $type) -> Self {
                Self(self.0 & !(alignment - 1))
            }

            /// Returns the offset of the value within a block of `alignment`
            /// bytes.
            pub const fn offset_in(self, alignment: $type) -> $type {
                self.0 & (alignment - 1)
            }
        }

        impl From<$type> for $name {
            fn from(value: $type) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $type {
            fn from(value: $name) -> $type {
                value.0
            }
        }

        impl ::std::ops::Sub<$name> for $name {
            type Output = $type;

            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }

        $crate::core::macros::impl_binary_op!($name, $type, Add, add, AddAssign, add_assign, +);
        $crate::core::macros::impl_binary_op!($name, $type, Sub, sub, SubAssign, sub_assign, -);
        $crate::core::macros::impl_binary_op!($name, $type, BitAnd, bitand, BitAndAssign, bitand_assign, &);
        $crate::core::macros::impl_binary_op!($name, $type, BitOr, bitor, BitOrAssign, bitor_assign, |);

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                ::std::fmt::Display::fmt(self, f)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                let width = ::std::mem::size_of::<$type>() * 2;
                write!(f, "0x{:0width$x}", self.0, width = width)
            }
        }

        impl ::std::fmt::LowerHex for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                ::std::fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

pub(crate) use impl_address;
pub(crate) use impl_binary_op;

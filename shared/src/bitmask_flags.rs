use num_traits::{One, PrimInt};

/// Trait implemented by flag enums declared with [`define_bitmask_flags!`].
///
/// The enum discriminant is the bit index; `Storage` is the integer the bits live in.
pub trait FlagBitmask {
    type Storage: PrimInt;

    fn bit_index(&self) -> u8;

    fn mask(&self) -> Self::Storage {
        // NOTE: `bit_index()` must be < number of bits in `Storage`.
        Self::Storage::one() << (self.bit_index() as usize)
    }
}

/// A small copyable set of flags backed by a primitive integer.
///
/// The raw `bits` are what goes on the wire, so the bit layout of each flag enum is a
/// protocol contract: append new variants, never reorder.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BitmaskFlags<T: PrimInt> {
    pub bits: T,
}

impl<T: PrimInt> BitmaskFlags<T> {
    pub fn new(bits: T) -> Self {
        Self { bits }
    }

    pub fn from_flags<U: FlagBitmask<Storage = T> + Copy>(tags: &[U]) -> Self
    where
        T: Default,
    {
        let mut flags = Self::default();
        flags.add_many(tags);
        flags
    }

    pub fn add<U: FlagBitmask<Storage = T>>(&mut self, tag: U) {
        self.bits = self.bits | tag.mask();
    }

    pub fn remove<U: FlagBitmask<Storage = T>>(&mut self, tag: U) {
        self.bits = self.bits & !tag.mask();
    }

    pub fn set<U: FlagBitmask<Storage = T>>(&mut self, tag: U, on: bool) {
        if on {
            self.add(tag);
        } else {
            self.remove(tag);
        }
    }

    pub fn has<U: FlagBitmask<Storage = T>>(&self, tag: U) -> bool {
        (self.bits & tag.mask()) != T::zero()
    }

    pub fn add_many<U: FlagBitmask<Storage = T> + Copy>(&mut self, tags: &[U]) {
        for &tag in tags {
            self.add(tag);
        }
    }

    pub fn has_any<U: FlagBitmask<Storage = T> + Copy>(&self, tags: &[U]) -> bool {
        if tags.is_empty() {
            return false;
        }
        let combined = tags.iter().fold(T::zero(), |acc, t| acc | t.mask());
        (self.bits & combined) != T::zero()
    }

    /// Bitwise union, used to fold per-source settings into the group's accumulated settings.
    pub fn union(&mut self, other: Self) {
        self.bits = self.bits | other.bits;
    }

    pub fn is_empty(&self) -> bool {
        self.bits == T::zero()
    }

    pub fn clear(&mut self) {
        self.bits = T::zero();
    }
}

/// Declare a bitmask-backed enum and implement `FlagBitmask` for it.
///
/// Example:
/// ```rust
/// shared::define_bitmask_flags!(UnitStatus, u8, {
///     Prepared,
///     Finished,
/// });
/// ```
#[macro_export]
macro_rules! define_bitmask_flags {
    ($(#[$meta:meta])* $name:ident, $storage:ty, { $($variant:ident),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant),*
        }

        impl $crate::bitmask_flags::FlagBitmask for $name {
            type Storage = $storage;

            fn bit_index(&self) -> u8 {
                *self as u8
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    define_bitmask_flags!(TestFlag, u8, { A, B, C });

    #[test]
    fn add_remove_and_query() {
        let mut flags = BitmaskFlags::<u8>::default();
        flags.add(TestFlag::B);
        assert!(flags.has(TestFlag::B));
        assert!(!flags.has(TestFlag::A));
        assert_eq!(flags.bits, 0b010);

        flags.set(TestFlag::C, true);
        assert!(flags.has_any(&[TestFlag::A, TestFlag::C]));

        flags.remove(TestFlag::B);
        flags.set(TestFlag::C, false);
        assert!(flags.is_empty());
    }

    #[test]
    fn union_merges_bits() {
        let mut a = BitmaskFlags::from_flags(&[TestFlag::A]);
        a.union(BitmaskFlags::from_flags(&[TestFlag::C]));
        assert_eq!(a.bits, 0b101);
    }
}

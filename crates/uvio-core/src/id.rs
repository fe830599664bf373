//! Generation-checked identifiers
//!
//! Handles and requests live in slot tables owned by the loop. An id is the
//! slot index plus the generation the slot had when the object was stored.
//! Releasing a slot bumps its generation, so an id held past release never
//! resolves to whatever occupies the slot next.

use core::fmt;

/// Index and generation of one slot in a [`SlotTable`](crate::slot::SlotTable).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    /// Sentinel value that never names a live slot
    pub const NONE: SlotId = SlotId {
        index: u32::MAX,
        generation: 0,
    };

    /// Create a new id from raw parts
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        SlotId { index, generation }
    }

    /// Slot index
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Get as usize for indexing
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    /// Generation the slot had when this id was issued
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Check if this is the NONE sentinel
    #[inline]
    pub const fn is_none(self) -> bool {
        self.index == u32::MAX
    }

    /// Pack into a single u64: generation in the high half, index in the low.
    ///
    /// The loop uses this as the poller token for descriptor-backed handles.
    #[inline]
    pub const fn to_u64(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Inverse of [`to_u64`](Self::to_u64)
    #[inline]
    pub const fn from_u64(raw: u64) -> Self {
        SlotId {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "SlotId(NONE)")
        } else {
            write!(f, "SlotId({}v{})", self.index, self.generation)
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

macro_rules! slot_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(SlotId);

        impl $name {
            /// Sentinel value that never names a live object
            pub const NONE: $name = $name(SlotId::NONE);

            /// Wrap a slot id
            #[inline]
            pub const fn new(slot: SlotId) -> Self {
                $name(slot)
            }

            /// Underlying slot id
            #[inline]
            pub const fn slot(self) -> SlotId {
                self.0
            }

            /// Check if this is the NONE sentinel
            #[inline]
            pub const fn is_none(self) -> bool {
                self.0.is_none()
            }
        }

        impl From<SlotId> for $name {
            #[inline]
            fn from(slot: SlotId) -> Self {
                $name(slot)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_none() {
                    write!(f, concat!(stringify!($name), "(NONE)"))
                } else {
                    write!(f, concat!(stringify!($name), "({})"), self.0)
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

slot_newtype! {
    /// Identifies a handle bound to a loop
    HandleId
}

slot_newtype! {
    /// Identifies an in-flight request
    RequestId
}

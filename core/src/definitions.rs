use core::fmt::{self, Display};

use crate::{CallpathTree, Rank, Region, RegionId, WindowId};

// LOCATION ID
// ================================================================================================

/// Global identifier of a location (one thread of one process).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, derive_more::From)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocationId(pub u32);

impl LocationId {
    /// Returns the raw index.
    #[inline(always)]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

// LOCATION
// ================================================================================================

/// Descriptor of a location: which process (MPI rank) and which thread within it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Location {
    /// MPI rank of the owning process.
    pub rank: u32,
    /// Thread index within the process; 0 is the master thread.
    pub thread: u32,
    /// The thread-team communicator this location runs under, if its process is threaded.
    pub thread_team: Option<CommId>,
}

impl Location {
    /// Returns true if this location is the master thread of its process.
    pub fn is_master(&self) -> bool {
        self.thread == 0
    }
}

// COMMUNICATOR
// ================================================================================================

/// What kind of group a communicator describes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CommKind {
    /// An MPI communicator; members are process master locations.
    Mpi,
    /// A thread team created by a fork; members are the team's locations.
    ThreadTeam,
}

/// A communicator or thread team: an ordered group of locations.
///
/// The rank of a location within the communicator is its position in the member list.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Communicator {
    kind: CommKind,
    members: Vec<LocationId>,
}

impl Communicator {
    /// Returns a new communicator over the specified members.
    pub fn new(kind: CommKind, members: Vec<LocationId>) -> Self {
        Self { kind, members }
    }

    /// Returns the communicator kind.
    pub fn kind(&self) -> CommKind {
        self.kind
    }

    /// Returns the member locations, in rank order.
    pub fn members(&self) -> &[LocationId] {
        &self.members
    }

    /// Returns the number of members.
    pub fn size(&self) -> u32 {
        self.members.len() as u32
    }

    /// Returns the rank of the specified location within this communicator, if it is a member.
    pub fn rank_of(&self, location: LocationId) -> Option<Rank> {
        self.members.iter().position(|&m| m == location).map(|p| p as Rank)
    }

    /// Returns the location at the specified rank.
    ///
    /// # Panics
    /// Panics if the rank is out of bounds.
    pub fn location_at(&self, rank: Rank) -> LocationId {
        self.members[rank as usize]
    }
}

// WINDOW
// ================================================================================================

/// An RMA window definition.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Window {
    /// Communicator the window was created on.
    pub comm: CommId,
}

// GLOBAL DEFINITIONS
// ================================================================================================

/// The shared global definitions: region table, calling-context tree, communicator table,
/// location table and RMA window table.
///
/// Definitions are constructed up front (by the out-of-scope definition loader, or by the test
/// trace builder) and are immutable for the lifetime of the analysis.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GlobalDefs {
    /// Region table, indexed by [`RegionId`].
    pub regions: Vec<Region>,
    /// The calling-context tree.
    pub callpaths: CallpathTree,
    /// Communicator table, indexed by [`CommId`].
    pub communicators: Vec<Communicator>,
    /// Location table, indexed by [`LocationId`].
    pub locations: Vec<Location>,
    /// RMA window table, indexed by [`WindowId`].
    pub windows: Vec<Window>,
}

impl GlobalDefs {
    /// Returns the region with the specified id.
    ///
    /// # Panics
    /// Panics if the id is not in the table.
    pub fn region(&self, id: RegionId) -> &Region {
        &self.regions[id.0 as usize]
    }

    /// Returns the communicator with the specified id.
    ///
    /// # Panics
    /// Panics if the id is not in the table.
    pub fn comm(&self, id: CommId) -> &Communicator {
        &self.communicators[id.0 as usize]
    }

    /// Returns the location descriptor with the specified id.
    ///
    /// # Panics
    /// Panics if the id is not in the table.
    pub fn location(&self, id: LocationId) -> &Location {
        &self.locations[id.as_usize()]
    }

    /// Returns the window with the specified id.
    ///
    /// # Panics
    /// Panics if the id is not in the table.
    pub fn window(&self, id: WindowId) -> &Window {
        &self.windows[id.0 as usize]
    }

    /// Returns the number of locations.
    pub fn num_locations(&self) -> usize {
        self.locations.len()
    }
}

// COMM ID
// ================================================================================================

/// Stable identifier of a communicator or thread team.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, derive_more::From)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommId(pub u32);

impl Display for CommId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

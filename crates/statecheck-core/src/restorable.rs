//! Restorable VM snapshots.
//!
//! A [`RestorableVmState`] captures the backtracker token, the last
//! transition and the path.  The token always stays in memory; the other two
//! are kept in storage form and, with [`OffloadPolicy::File`], written to a
//! snapshot file at capture time.  They are rehydrated on first access:
//!
//! ```text
//! capture ──→ Stored ─────────────┐
//!        └──→ Offloaded(file) ────┴──→ first access ──→ Live
//!                   │
//!                   └── read fails ──→ Lost (every later access errors)
//! ```
//!
//! Snapshots are single-consumer: the file is deleted on rehydration, and
//! every accessor takes `&mut self`.

use crate::config::OffloadPolicy;
use crate::error::CoreError;
use crate::path::Path;
use crate::storage::{SnapshotData, SnapshotStore};
use crate::transition::Transition;
use crate::{ThreadId, UNKNOWN_STATE_ID};
use log::{debug, warn};
use std::path::PathBuf;

#[derive(Debug)]
struct Live {
    last: Option<Transition>,
    path: Option<Path>,
}

#[derive(Debug)]
enum Data {
    Stored(Box<SnapshotData>),
    Offloaded(PathBuf),
    Live(Box<Live>),
    Lost(String),
}

/// A snapshot of the search frontier.
#[derive(Debug)]
pub struct RestorableVmState<B> {
    bk_state: B,
    data: Data,
}

impl<B> RestorableVmState<B> {
    /// Capture a snapshot.
    ///
    /// With [`OffloadPolicy::File`] the stored forms go to a new file in
    /// `store`; without a store they are kept in memory.
    pub fn capture(
        bk_state: B,
        last: Option<&Transition>,
        path: Option<&Path>,
        policy: OffloadPolicy,
        store: Option<&SnapshotStore>,
    ) -> Result<Self, CoreError> {
        let last = last.map(Transition::store);
        let path = path.map(Path::store);

        let data = match (policy, store) {
            (OffloadPolicy::File, Some(store)) => {
                Data::Offloaded(store.write(last.as_ref(), path.as_ref())?)
            }
            (OffloadPolicy::File, None) => {
                warn!("file offload requested without a snapshot store; keeping it in memory");
                Data::Stored(Box::new((last, path)))
            }
            (OffloadPolicy::Memory, _) => Data::Stored(Box::new((last, path))),
        };
        Ok(Self { bk_state, data })
    }

    pub fn bk_state(&self) -> &B {
        &self.bk_state
    }

    /// Whether the data still waits in a snapshot file.
    pub fn is_offloaded(&self) -> bool {
        matches!(self.data, Data::Offloaded(_))
    }

    /// The snapshot file, while the data has not been rehydrated.
    pub fn offload_file(&self) -> Option<&std::path::Path> {
        match &self.data {
            Data::Offloaded(file) => Some(file),
            _ => None,
        }
    }

    pub fn is_lost(&self) -> bool {
        matches!(self.data, Data::Lost(_))
    }

    pub fn last_transition(&mut self) -> Result<Option<&Transition>, CoreError> {
        Ok(self.live()?.last.as_ref())
    }

    pub fn path(&mut self) -> Result<Option<&Path>, CoreError> {
        Ok(self.live()?.path.as_ref())
    }

    pub fn has_no_path(&mut self) -> Result<bool, CoreError> {
        Ok(self.live()?.path.is_none())
    }

    /// Thread of the last transition.
    pub fn thread(&mut self) -> Result<ThreadId, CoreError> {
        self.live()?
            .last
            .as_ref()
            .map(Transition::thread)
            .ok_or(CoreError::NoLastTransition)
    }

    fn live(&mut self) -> Result<&Live, CoreError> {
        self.rehydrate()?;
        match &self.data {
            Data::Live(live) => Ok(live.as_ref()),
            _ => Err(CoreError::invariant(
                UNKNOWN_STATE_ID,
                "snapshot not rehydrated after successful load",
            )),
        }
    }

    fn rehydrate(&mut self) -> Result<(), CoreError> {
        let loaded = match &self.data {
            Data::Live(_) => return Ok(()),
            Data::Lost(reason) => {
                return Err(CoreError::SnapshotLost {
                    reason: reason.clone(),
                })
            }
            Data::Stored(data) => Ok(restore(data)),
            Data::Offloaded(file) => SnapshotStore::load_once(file).map(|data| restore(&data)),
        };

        match loaded {
            Ok(live) => {
                debug!("snapshot rehydrated");
                self.data = Data::Live(Box::new(live));
                Ok(())
            }
            Err(e) => {
                warn!("snapshot lost: {}", e);
                self.data = Data::Lost(e.to_string());
                Err(e.into())
            }
        }
    }
}

fn restore((last, path): &SnapshotData) -> Live {
    Live {
        last: last.as_ref().map(|t| t.restore()),
        path: path.as_ref().map(|p| p.restore()),
    }
}

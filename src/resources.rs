//! Cloud resources whose lifetime is bound to a single benchmark run.
//!
//! A backing store implements [`Resource`], which only knows how to talk to the outside world.
//! [`ManagedResource`] wraps it and tracks where the resource is in its lifecycle:
//!
//! ```txt
//! Absent --create()--> Creating --ok--> Present --delete()--> Deleting --ok--> Absent
//! ```
//!
//! Creating an already present resource and deleting an absent one are tolerated: both are
//! logged as warnings and leave the state untouched. A failed `create()` leaves the resource in
//! `Creating`, so that cleanup still tears down whatever was partially provisioned.
//!
//! [`ManagedResource::exists`] is a best-effort probe. A `false` answer is not a proof of
//! absence: when the probe itself fails, it is logged as an error and collapsed to `false`.

use crate::error::Result;
use log::{error, info, warn};
use parking_lot::Mutex;

/// Name, project and zone of a provisioned resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceIdentity {
    name: String,
    project: String,
    zone: String,
}

impl ResourceIdentity {
    pub fn new(name: &str, project: &str, zone: &str) -> Self {
        Self {
            name: name.to_string(),
            project: project.to_string(),
            zone: zone.to_string(),
        }
    }

    /// The identity of the resource owned by a run, named `pkb-<run_id>` so that concurrent runs
    /// never share one.
    pub fn for_run(run_id: &str, project: &str, zone: &str) -> Self {
        Self::new(&resource_name(run_id), project, zone)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// `projects/<project>/instances/<name>`, as reported by listings.
    pub fn full_name(&self) -> String {
        format!("projects/{}/instances/{}", self.project, self.name)
    }
}

/// The resource name derived from a run id.
pub fn resource_name(run_id: &str) -> String {
    format!("pkb-{}", run_id)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceState {
    Absent,
    Creating,
    Present,
    Deleting,
}

/// What an external create/delete call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    /// The call changed the resource.
    Applied,
    /// The external tool reported the target state already held.
    Unchanged,
}

/// The external operations of one kind of backing store.
pub trait Resource: Send + Sync {
    fn identity(&self) -> &ResourceIdentity;

    /// Provision the resource.
    fn create(&self) -> Result<Change>;

    /// Destroy the resource, together with everything `create` provisioned.
    fn delete(&self) -> Result<Change>;

    /// Probe the external listing. An `Err` means the answer is unknown.
    fn exists(&self) -> Result<bool>;
}

/// A [`Resource`] together with its lifecycle state.
pub struct ManagedResource {
    inner: Box<dyn Resource>,
    state: Mutex<ResourceState>,
}

impl ManagedResource {
    pub fn new(inner: Box<dyn Resource>) -> Self {
        Self {
            inner,
            state: Mutex::new(ResourceState::Absent),
        }
    }

    /// Adopt a resource that a previous run left behind.
    pub fn existing(inner: Box<dyn Resource>) -> Self {
        Self {
            inner,
            state: Mutex::new(ResourceState::Present),
        }
    }

    pub fn identity(&self) -> &ResourceIdentity {
        self.inner.identity()
    }

    pub fn state(&self) -> ResourceState {
        *self.state.lock()
    }

    pub fn create(&self) -> Result<()> {
        let mut state = self.state.lock();
        let name = self.identity().name().to_string();
        match *state {
            ResourceState::Present => {
                warn!("Resource {} is already present, not creating it again", name);
                return Ok(());
            }
            ResourceState::Deleting => {
                warn!("Resource {} is being deleted, creating it anyway", name);
            }
            ResourceState::Absent | ResourceState::Creating => {}
        }
        *state = ResourceState::Creating;
        info!("Creating resource {}", name);
        // on error the state stays Creating
        if self.inner.create()? == Change::Unchanged {
            warn!("Resource {} already exists", name);
        }
        *state = ResourceState::Present;
        info!("Resource {} created", name);
        Ok(())
    }

    pub fn delete(&self) -> Result<()> {
        let mut state = self.state.lock();
        let name = self.identity().name().to_string();
        if *state == ResourceState::Absent {
            warn!("Resource {} is absent, nothing to delete", name);
            return Ok(());
        }
        *state = ResourceState::Deleting;
        info!("Deleting resource {}", name);
        if self.inner.delete()? == Change::Unchanged {
            warn!("Resource {} was already deleted", name);
        }
        *state = ResourceState::Absent;
        info!("Resource {} deleted", name);
        Ok(())
    }

    /// Best-effort existence probe; see the module documentation.
    pub fn exists(&self) -> bool {
        match self.inner.exists() {
            Ok(found) => found,
            Err(e) => {
                error!(
                    "Could not determine whether {} exists, reporting it as absent: {}",
                    self.identity().full_name(),
                    e
                );
                false
            }
        }
    }
}

pub mod firestore;

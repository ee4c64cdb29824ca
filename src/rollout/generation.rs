// ABOUTME: Generations and blue/green slot naming.
// ABOUTME: A candidate takes the slot the active generation does not occupy.

use std::fmt;

use crate::types::{GenerationId, ServiceName};
use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Blue,
    Green,
}

impl Slot {
    pub fn other(self) -> Slot {
        match self {
            Slot::Blue => Slot::Green,
            Slot::Green => Slot::Blue,
        }
    }

    /// Slot encoded in a generation id of `service`, if any.
    pub fn of(service: &ServiceName, id: &GenerationId) -> Option<Slot> {
        let rest = id
            .as_str()
            .strip_prefix(service.as_str())?
            .strip_prefix('-')?;
        if rest.starts_with("blue-") {
            Some(Slot::Blue)
        } else if rest.starts_with("green-") {
            Some(Slot::Green)
        } else {
            None
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Blue => write!(f, "blue"),
            Slot::Green => write!(f, "green"),
        }
    }
}

/// One running instantiation of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub service: ServiceName,
    pub id: GenerationId,
    /// Unknown for generations recorded before versions were tracked.
    pub version: Option<Version>,
}

impl Generation {
    /// The candidate that replaces `active`: `<service>-<slot>-<version>`.
    pub fn candidate(service: &ServiceName, version: &Version, active: Option<&Generation>) -> Self {
        let slot = active
            .and_then(|a| Slot::of(service, &a.id))
            .map(Slot::other)
            .unwrap_or(Slot::Blue);
        Self {
            service: service.clone(),
            id: GenerationId::new(format!("{service}-{slot}-{version}")),
            version: Some(version.clone()),
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

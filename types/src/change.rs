// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Normalized change records
//!
//! A [`Change`] describes one desired service/instance state transition,
//! fully resolved to UUIDs.  Changes are immutable once placed into a plan.

use serde::Deserialize;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// The kind of state transition a [`Change`] describes
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    UpdateService,
    UpdateInstance,
    UpdateInstances,
    CreateInstances,
    DeleteInstance,
    AddInstance,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::UpdateService => "update-service",
            ChangeKind::UpdateInstance => "update-instance",
            ChangeKind::UpdateInstances => "update-instances",
            ChangeKind::CreateInstances => "create-instances",
            ChangeKind::DeleteInstance => "delete-instance",
            ChangeKind::AddInstance => "add-instance",
        };
        f.write_str(s)
    }
}

/// Whether a service runs as replaceable VM instances or as a host-resident
/// agent on each physical server
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Vm,
    Agent,
}

/// A resolved reference to a service in the service directory
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServiceRef {
    pub name: String,
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
}

/// A resolved reference to an image in the image registry
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ImageRef {
    pub uuid: Uuid,
    pub name: String,
    pub version: String,
}

impl ImageRef {
    /// Orders two image versions, "latest wins" style: semver versions by
    /// semver precedence, build stamps (`branch-YYYYMMDD-NNNN`) by their
    /// embedded date and sequence number, anything else lexicographically.
    /// A mixed-format pair carries no real version relationship; it orders
    /// by a fixed format rank so sorts stay deterministic.
    pub fn cmp_version(&self, other: &ImageRef) -> Ordering {
        VersionKey::parse(&self.version)
            .cmp(&VersionKey::parse(&other.version))
    }

    /// Like [`ImageRef::cmp_version`], but only for versions sharing a
    /// format.  Mixed-format pairs return `None`.
    pub fn try_cmp_version(&self, other: &ImageRef) -> Option<Ordering> {
        let a = VersionKey::parse(&self.version);
        let b = VersionKey::parse(&other.version);
        (std::mem::discriminant(&a) == std::mem::discriminant(&b))
            .then(|| a.cmp(&b))
    }
}

/// One parsed image version.  The variant order is the format rank used
/// when a sort has to place versions of different formats relative to one
/// another; only same-variant comparisons are meaningful.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum VersionKey {
    Opaque(String),
    Stamp { date: u32, seq: u32 },
    Semver(semver::Version),
}

impl VersionKey {
    fn parse(version: &str) -> VersionKey {
        if let Ok(v) = semver::Version::parse(version) {
            return VersionKey::Semver(v);
        }
        // build stamps end in an 8-digit date and a sequence number
        let fields: Vec<&str> = version.split('-').collect();
        if let [.., date, seq] = fields.as_slice() {
            if date.len() == 8 {
                if let (Ok(date), Ok(seq)) =
                    (date.parse::<u32>(), seq.parse::<u32>())
                {
                    return VersionKey::Stamp { date, seq };
                }
            }
        }
        VersionKey::Opaque(version.to_string())
    }
}

/// A resolved reference to one running instance of a service
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct InstanceRef {
    pub uuid: Uuid,
    pub service: String,
    /// the physical server hosting this instance, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<Uuid>,
}

/// Binds a target server to a service+image for one creation or update
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct InstanceAssignment {
    /// target server; required for creations, informational for in-place
    /// instance updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<Uuid>,
    pub service: String,
    pub image: Uuid,
    /// the instance being replaced, absent for fresh creations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<Uuid>,
}

/// A normalized description of one desired state transition
///
/// Immutable once placed into a plan.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Change {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub service: ServiceRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    /// the image the service was on when the plan was generated; consumed by
    /// rollback as the target to return to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_image: Option<ImageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insts: Vec<InstanceAssignment>,
}

#[cfg(test)]
mod test {
    use super::*;

    fn image(version: &str) -> ImageRef {
        ImageRef {
            uuid: Uuid::new_v4(),
            name: "papi".to_string(),
            version: version.to_string(),
        }
    }

    #[test]
    fn test_semver_image_ordering() {
        assert_eq!(
            image("1.2.0").cmp_version(&image("1.10.0")),
            Ordering::Less
        );
    }

    #[test]
    fn test_timestamp_image_ordering() {
        // Not semver, so the embedded build date orders the stamps.
        assert_eq!(
            image("release-20240101-0001").cmp_version(&image(
                "release-20240301-0001"
            )),
            Ordering::Less
        );
    }

    #[test]
    fn test_stamp_sequence_orders_numerically() {
        assert_eq!(
            image("release-20240101-2").cmp_version(&image(
                "release-20240101-10"
            )),
            Ordering::Less
        );
    }

    #[test]
    fn test_mixed_format_versions_do_not_compare() {
        let tagged = image("2.0.0");
        let stamped = image("release-20150320-0001");
        assert_eq!(tagged.try_cmp_version(&stamped), None);
        assert_eq!(stamped.try_cmp_version(&tagged), None);
        // the total order is still antisymmetric for sorting
        assert_eq!(
            tagged.cmp_version(&stamped),
            stamped.cmp_version(&tagged).reverse()
        );
    }
}

//! Controller owner references tying dependents to a managed resource.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;

/// Static type identity of a resource kind managed by the operator.
pub trait ManagedKind {
    const API_VERSION: &'static str;
    const KIND: &'static str;
}

/// Build the controlling owner reference pointing at `owner`.
///
/// The garbage collector cascades deletion from `owner` to every object carrying
/// this reference. The controller flag is always set.
pub fn owner_reference_for<K>(owner: &K) -> OwnerReference
where
    K: ManagedKind + Resource,
{
    let meta = owner.meta();
    OwnerReference {
        api_version: K::API_VERSION.to_string(),
        kind: K::KIND.to_string(),
        name: meta.name.clone().unwrap_or_default(),
        uid: meta.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: None,
    }
}

/// Whether `meta` lists a controlling owner with the given uid.
pub fn is_controlled_by(meta: &kube::api::ObjectMeta, owner_uid: &str) -> bool {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|r| r.controller == Some(true) && r.uid == owner_uid)
}

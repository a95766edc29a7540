//! Mutations shared by every `StackStore` backend.
//!
//! Backends load the stack, apply one of these to it and write it back.

use stackflow_id::PrivateId;

use super::StoreError;
use crate::cloud::CloudVmMetaData;
use crate::domain::{InstanceGroup, InstanceMetaData, InstanceStatus, Stack};

pub(crate) fn group_mut<'a>(
    stack: &'a mut Stack,
    group: &str,
) -> Result<&'a mut InstanceGroup, StoreError> {
    let stack_id = stack.id;
    stack
        .instance_groups
        .iter_mut()
        .find(|g| g.name == group)
        .ok_or_else(|| StoreError::GroupNotFound {
            stack_id,
            group: group.to_string(),
        })
}

pub(crate) fn instance_mut(
    stack: &mut Stack,
    private_id: PrivateId,
) -> Result<&mut InstanceMetaData, StoreError> {
    let stack_id = stack.id;
    stack
        .instance_groups
        .iter_mut()
        .flat_map(|g| g.instances.iter_mut())
        .find(|i| i.private_id == private_id)
        .ok_or(StoreError::InstanceNotFound {
            stack_id,
            private_id,
        })
}

/// Appends `count` requested instances to `group`, numbering them after the
/// highest private id on the stack.
pub(crate) fn add_requests(
    stack: &mut Stack,
    group: &str,
    count: u32,
) -> Result<Vec<PrivateId>, StoreError> {
    let mut next = stack
        .instances()
        .map(|i| i.private_id.next())
        .max()
        .unwrap_or_default();

    let group = group_mut(stack, group)?;
    let mut ids = Vec::with_capacity(count as usize);
    for _ in 0..count {
        group
            .instances
            .push(InstanceMetaData::requested(next, group.name.clone()));
        ids.push(next);
        next = next.next();
    }
    Ok(ids)
}

pub(crate) fn delete_request(stack: &mut Stack, private_id: PrivateId) -> bool {
    for group in &mut stack.instance_groups {
        if let Some(pos) = group.instances.iter().position(|i| i.private_id == private_id) {
            group.instances.remove(pos);
            return true;
        }
    }
    false
}

pub(crate) fn apply_metadata(
    stack: &mut Stack,
    metadata: &[CloudVmMetaData],
) -> Result<(), StoreError> {
    for meta in metadata {
        let instance = instance_mut(stack, meta.private_id)?;
        instance.instance_id = Some(meta.instance_id.clone());
        instance.private_ip = Some(meta.private_ip.clone());
        instance.public_ip = Some(meta.public_ip.clone());
        instance.long_hostname = Some(meta.long_hostname.clone());
        if instance.status == InstanceStatus::Requested {
            instance.status = InstanceStatus::Created;
        }
    }
    Ok(())
}

pub(crate) fn remove_instances(stack: &mut Stack, private_ids: &[PrivateId]) {
    for group in &mut stack.instance_groups {
        group.instances.retain(|i| !private_ids.contains(&i.private_id));
    }
}

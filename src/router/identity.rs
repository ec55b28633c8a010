//! Identity resolution: dedupe external contacts within a tenant.

use crate::model::{Contact, ContactStatus, TenantId};
use crate::store::Store;
use anyhow::Result;
use uuid::Uuid;

/// Find the contact for a (tenant, handle) pair, creating one when none
/// exists or the existing record is closed. Idempotent under concurrent
/// duplicate updates: the caller holds the (tenant, handle) lock.
pub async fn resolve_or_create_contact(
    store: &dyn Store,
    tenant_id: TenantId,
    handle: &str,
    display_name: &str,
) -> Result<Contact> {
    if let Some(existing) = store.find_contact(tenant_id, handle).await? {
        if existing.status != ContactStatus::Closed {
            return Ok(existing);
        }
    }

    let contact = Contact {
        id: Uuid::new_v4(),
        tenant_id,
        handle: handle.to_string(),
        display_name: display_name.to_string(),
        status: ContactStatus::InProgress,
    };
    store.insert_contact(contact.clone()).await?;
    Ok(contact)
}

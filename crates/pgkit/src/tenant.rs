//! Nile tenant context.
//!
//! The current tenant is bound server-side with `SET nile.tenant_id` and
//! mirrored locally so scoped changes can be undone.

use parking_lot::Mutex;

use crate::{PgKitError, Result};

/// Statement that unbinds the current tenant.
pub const RESET_TENANT_SQL: &str = "RESET nile.tenant_id";

/// Escape a tenant id for use inside a single-quoted SQL literal.
///
/// # Errors
///
/// Rejects ids containing a NUL byte.
pub fn escape_tenant_id(id: &str) -> Result<String> {
    if id.contains('\0') {
        return Err(PgKitError::Validation(
            "Tenant id cannot contain a null byte".to_string(),
        ));
    }
    Ok(id.replace('\'', "''"))
}

/// Statement that binds `id` as the current tenant.
pub fn set_tenant_sql(id: &str) -> Result<String> {
    Ok(format!("SET nile.tenant_id = '{}'", escape_tenant_id(id)?))
}

/// Locally tracked tenant id, owned by one client.
#[derive(Debug, Default)]
pub struct TenantContext {
    current: Mutex<Option<String>>,
}

impl TenantContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<String> {
        self.current.lock().clone()
    }

    pub fn set(&self, id: Option<String>) {
        *self.current.lock() = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quotes_are_doubled() {
        assert_eq!(
            set_tenant_sql("o'brien").unwrap(),
            "SET nile.tenant_id = 'o''brien'"
        );
    }

    #[test]
    fn test_null_byte_rejected() {
        assert!(matches!(
            escape_tenant_id("a\0b").unwrap_err(),
            PgKitError::Validation(_)
        ));
    }

    #[test]
    fn test_context_tracks_value() {
        let ctx = TenantContext::new();
        assert_eq!(ctx.get(), None);
        ctx.set(Some("t1".to_string()));
        assert_eq!(ctx.get().as_deref(), Some("t1"));
        ctx.set(None);
        assert_eq!(ctx.get(), None);
    }
}

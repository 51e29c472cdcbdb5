//! Per-user access descriptor for the shared memory region.
//!
//! The agent only opens regions owned by the same user it runs as, so each
//! region is created with a security descriptor whose owner is the SID of
//! the current process token.

use crate::error::{PageantError, Result};
use crate::native::guard::OwnedHandle;
use crate::native::{NativeApi, SecurityAttributes, SecurityDescriptor, TokenUser};

/// Security attributes for one region, plus the memory they point into.
///
/// `attributes` refers to `descriptor`, whose owner refers into `user`; all
/// three live and move together.
#[derive(Debug)]
pub struct AccessDescriptor {
    attributes: SecurityAttributes,
    descriptor: Box<SecurityDescriptor>,
    user: TokenUser,
}

impl AccessDescriptor {
    /// Attributes to pass to `CreateFileMapping`.
    pub fn attributes(&self) -> &SecurityAttributes {
        &self.attributes
    }

    /// The initialized security descriptor.
    pub fn descriptor(&self) -> &SecurityDescriptor {
        &self.descriptor
    }

    /// The owner SID.
    pub fn owner_sid(&self) -> *mut std::ffi::c_void {
        self.user.sid()
    }
}

/// Build inheritable security attributes owned by the current user.
///
/// Every native step is checked; the first falsy result fails with
/// [`PageantError::SecurityContext`] carrying the step and OS error code.
pub fn access_descriptor_for_current_user<A: NativeApi + ?Sized>(
    api: &A,
) -> Result<AccessDescriptor> {
    let user = current_user(api)?;

    let mut descriptor = Box::new(SecurityDescriptor::zeroed());
    check(
        api,
        "InitializeSecurityDescriptor",
        api.initialize_security_descriptor(&mut descriptor),
    )?;
    check(
        api,
        "SetSecurityDescriptorOwner",
        api.set_security_descriptor_owner(&mut descriptor, user.sid()),
    )?;
    check(
        api,
        "IsValidSecurityDescriptor",
        api.is_valid_security_descriptor(&descriptor),
    )?;

    let attributes = SecurityAttributes::inheritable(&mut descriptor);

    Ok(AccessDescriptor {
        attributes,
        descriptor,
        user,
    })
}

fn current_user<A: NativeApi + ?Sized>(api: &A) -> Result<TokenUser> {
    let token = api
        .open_process_token()
        .ok_or_else(|| security_error(api, "OpenProcessToken"))?;
    let token = OwnedHandle::new(api, token);

    api.token_user(token.raw())
        .ok_or_else(|| security_error(api, "GetTokenInformation"))
}

fn check<A: NativeApi + ?Sized>(api: &A, step: &'static str, ok: bool) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(security_error(api, step))
    }
}

fn security_error<A: NativeApi + ?Sized>(api: &A, step: &'static str) -> PageantError {
    let code = api.last_error();
    tracing::warn!(step, code, "security descriptor setup failed");
    PageantError::SecurityContext { step, code }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FailPoint, FakeApi};

    #[test]
    fn test_descriptor_owned_by_current_user() {
        let api = FakeApi::new();

        let access = access_descriptor_for_current_user(&api).unwrap();

        assert_eq!(access.descriptor().revision, 1);
        assert_eq!(access.descriptor().owner, access.owner_sid());
        assert!(!access.owner_sid().is_null());
        assert_eq!(access.attributes().inherit_handle, 1);
        assert_eq!(
            access.attributes().security_descriptor,
            access.descriptor() as *const SecurityDescriptor as *mut _
        );
    }

    #[test]
    fn test_attributes_survive_move() {
        let api = FakeApi::new();
        let access = access_descriptor_for_current_user(&api).unwrap();

        let moved = vec![access];

        assert_eq!(
            moved[0].attributes().security_descriptor,
            moved[0].descriptor() as *const SecurityDescriptor as *mut _
        );
    }

    #[test]
    fn test_token_handle_closed() {
        let api = FakeApi::new();

        let _access = access_descriptor_for_current_user(&api).unwrap();

        assert_eq!(api.open_handles(), 0);
    }

    #[test]
    fn test_each_step_fails_fast() {
        let steps = [
            (FailPoint::OpenProcessToken, "OpenProcessToken"),
            (FailPoint::TokenInformation, "GetTokenInformation"),
            (FailPoint::InitializeDescriptor, "InitializeSecurityDescriptor"),
            (FailPoint::SetOwner, "SetSecurityDescriptorOwner"),
            (FailPoint::ValidateDescriptor, "IsValidSecurityDescriptor"),
        ];

        for (point, expected_step) in steps {
            let api = FakeApi::new().fail_at(point, 1307);

            let err = access_descriptor_for_current_user(&api).unwrap_err();

            match err {
                PageantError::SecurityContext { step, code } => {
                    assert_eq!(step, expected_step);
                    assert_eq!(code, 1307);
                }
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(api.open_handles(), 0, "token leaked at {expected_step}");
        }
    }

    #[test]
    fn test_token_info_failure_skips_descriptor() {
        let api = FakeApi::new().fail_at(FailPoint::TokenInformation, 122);

        let _ = access_descriptor_for_current_user(&api);

        assert!(!api
            .calls()
            .iter()
            .any(|call| matches!(call, Call::InitializeSecurityDescriptor)));
    }
}

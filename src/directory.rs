//! User lookup seam consumed by the pager and the services.

use crate::error::Error;
use crate::model::{User, UserId};
use crate::storage::Storage;

pub trait UserDirectory {
    /// Resolve a user id. Unknown ids fail with [`Error::NotFound`].
    fn resolve_user(&self, id: UserId) -> Result<User, Error>;
}

impl UserDirectory for Storage {
    fn resolve_user(&self, id: UserId) -> Result<User, Error> {
        self.get_user(id)?
            .ok_or_else(|| Error::not_found("user", id.0))
    }
}

impl<D: UserDirectory + ?Sized> UserDirectory for &D {
    fn resolve_user(&self, id: UserId) -> Result<User, Error> {
        (**self).resolve_user(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{storage, user};
    use crate::ErrorKind;

    #[test]
    fn storage_resolves_known_users() {
        let storage = storage();
        let ana = user(&storage, "Ana");
        assert_eq!(storage.resolve_user(ana.id).unwrap(), ana);
        let err = storage.resolve_user(UserId(77)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("user 77"));
    }
}

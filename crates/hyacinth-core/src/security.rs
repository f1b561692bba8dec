use crate::domain::UserId;

/// Whether `user_id` may issue commands. An empty allow-list admits everyone.
pub fn is_authorized(user_id: Option<UserId>, allowed_users: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    allowed_users.is_empty() || allowed_users.contains(&user_id.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_admits_everyone() {
        assert!(is_authorized(Some(UserId(1)), &[]));
        assert!(!is_authorized(None, &[]));
    }

    #[test]
    fn allow_list_is_enforced() {
        assert!(is_authorized(Some(UserId(7)), &[7, 8]));
        assert!(!is_authorized(Some(UserId(9)), &[7, 8]));
    }
}

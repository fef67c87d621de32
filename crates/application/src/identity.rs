use domain::{Author, DomainResult, ImageRef, UserId};

/// 当前会话的身份提供者
/// 会话建立后同步可用，身份缺失的处理由外部负责
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> UserId;

    fn current_display_name(&self) -> String;

    fn current_avatar_ref(&self) -> Option<ImageRef> {
        None
    }
}

/// 以当前会话身份构造内容作者
pub fn current_author(identity: &dyn IdentityProvider) -> DomainResult<Author> {
    Author::new(
        identity.current_user_id(),
        identity.current_display_name(),
        identity.current_avatar_ref(),
    )
}

/// 固定身份，适用于测试和演示
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    user_id: UserId,
    display_name: String,
    avatar_ref: Option<ImageRef>,
}

impl StaticIdentity {
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            avatar_ref: None,
        }
    }

    pub fn with_avatar(mut self, avatar_ref: ImageRef) -> Self {
        self.avatar_ref = Some(avatar_ref);
        self
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> UserId {
        self.user_id.clone()
    }

    fn current_display_name(&self) -> String {
        self.display_name.clone()
    }

    fn current_avatar_ref(&self) -> Option<ImageRef> {
        self.avatar_ref.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_comes_from_identity() {
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_current_user_id()
            .return_const(UserId::new("u7"));
        identity
            .expect_current_display_name()
            .return_const("Cy".to_string());
        identity.expect_current_avatar_ref().return_const(None::<ImageRef>);

        let author = current_author(&identity).unwrap();
        assert_eq!(author.id, UserId::new("u7"));
        assert_eq!(author.display_name, "Cy");
    }

    #[test]
    fn blank_display_name_is_rejected() {
        let identity = StaticIdentity::new("u1", " ");
        assert!(current_author(&identity).is_err());
    }
}

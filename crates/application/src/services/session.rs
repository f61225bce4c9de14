use std::sync::Arc;

use domain::{SessionToken, UserId};

use crate::{error::ApplicationError, repository::UserRepository};

/// 握手成功后确定的身份，在整个连接生命周期内不变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: UserId,
    pub nickname: String,
}

pub struct SessionService {
    user_repository: Arc<dyn UserRepository>,
}

impl SessionService {
    pub fn new(user_repository: Arc<dyn UserRepository>) -> Self {
        Self { user_repository }
    }

    /// 将 cookie 中的原始凭证解析为身份。
    ///
    /// 凭证缺失、格式非法、查不到用户或用户没有昵称时返回 `Unauthorized`；
    /// 存储故障原样向上传递。
    pub async fn authenticate(
        &self,
        raw_token: Option<&str>,
    ) -> Result<SessionIdentity, ApplicationError> {
        let raw_token = raw_token.ok_or(ApplicationError::Unauthorized)?;
        let token = SessionToken::parse(raw_token).map_err(|_| ApplicationError::Unauthorized)?;

        let user_id = self
            .user_repository
            .resolve_session(&token)
            .await?
            .ok_or(ApplicationError::Unauthorized)?;
        let nickname = self
            .user_repository
            .get_nickname(user_id)
            .await?
            .ok_or(ApplicationError::Unauthorized)?;

        Ok(SessionIdentity { user_id, nickname })
    }

    /// 注销：凭证失效后该用户无法再建立新连接
    pub async fn logout(&self, raw_token: Option<&str>) -> Result<SessionIdentity, ApplicationError> {
        let identity = self.authenticate(raw_token).await?;
        self.user_repository.revoke_session(identity.user_id).await?;
        tracing::info!(user_id = %identity.user_id, "session revoked");
        Ok(identity)
    }
}

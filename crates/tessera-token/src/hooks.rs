//! Lifecycle callbacks.
//!
//! Every method has a no-op default, so implementors override only the
//! points they care about. `after_sign_in` and `before_sign_out` belong to the
//! request layer and are never called by [`crate::TokenEngine`]; the others are
//! called by the matching engine operation.
use crate::{ClaimSet, IssuedToken, TokenResult};

pub trait TokenHooks: Send + Sync {
    /// Called after a token is signed. Errors are logged and otherwise
    /// ignored; issuance is not rolled back.
    fn after_encode_and_sign(
        &self,
        _token_type: &str,
        _issued: &IssuedToken,
    ) -> TokenResult<()> {
        Ok(())
    }

    fn after_sign_in(&self, _issued: &IssuedToken) -> TokenResult<()> {
        Ok(())
    }

    fn before_sign_out(&self, _claims: &ClaimSet, _token: &str) -> TokenResult<()> {
        Ok(())
    }

    /// Called after signature and claim validation succeed. An error here
    /// rejects the token.
    fn on_verify(&self, _claims: &ClaimSet, _token: &str) -> TokenResult<()> {
        Ok(())
    }

    /// Called by `revoke`. Without an implementation revocation is a no-op and
    /// the token stays valid until it expires.
    fn on_revoke(&self, _claims: &ClaimSet, _token: &str) -> TokenResult<()> {
        Ok(())
    }

    fn on_refresh(&self, _old: &IssuedToken, _new: &IssuedToken) -> TokenResult<()> {
        Ok(())
    }

    fn on_exchange(&self, _old: &IssuedToken, _new: &IssuedToken) -> TokenResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl TokenHooks for NoopHooks {}

impl<T: TokenHooks + ?Sized> TokenHooks for std::sync::Arc<T> {
    fn after_encode_and_sign(&self, token_type: &str, issued: &IssuedToken) -> TokenResult<()> {
        (**self).after_encode_and_sign(token_type, issued)
    }

    fn after_sign_in(&self, issued: &IssuedToken) -> TokenResult<()> {
        (**self).after_sign_in(issued)
    }

    fn before_sign_out(&self, claims: &ClaimSet, token: &str) -> TokenResult<()> {
        (**self).before_sign_out(claims, token)
    }

    fn on_verify(&self, claims: &ClaimSet, token: &str) -> TokenResult<()> {
        (**self).on_verify(claims, token)
    }

    fn on_revoke(&self, claims: &ClaimSet, token: &str) -> TokenResult<()> {
        (**self).on_revoke(claims, token)
    }

    fn on_refresh(&self, old: &IssuedToken, new: &IssuedToken) -> TokenResult<()> {
        (**self).on_refresh(old, new)
    }

    fn on_exchange(&self, old: &IssuedToken, new: &IssuedToken) -> TokenResult<()> {
        (**self).on_exchange(old, new)
    }
}

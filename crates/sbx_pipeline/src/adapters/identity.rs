/// Seam to the identity provider, used to resolve the invoking operator's
/// platform username so the sandbox copy can grant them write access.
pub trait IdentityProvider {
    fn username_for_email(&self, email: &str) -> Result<String, String>;
}

//! UMA authorization: resource-set registration, permission tickets and
//! the claims-gathering negotiation that ends in a requesting-party token.
//!
//! A ticket represents one pending request for a resource-set/scope
//! combination. Claims supplied across negotiation rounds accumulate on
//! the ticket; once a policy is satisfied the ticket is atomically
//! consumed and an RPT scoped to that policy is minted.

use crate::errors::AuthError;
use crate::models::{
    AccessToken, AuthenticationHolder, Claim, Permission, PermissionTicket, Policy, Principal,
    ResourceSet,
};
use crate::scope::ScopeCatalog;
use crate::store::CredentialStore;
use crate::token::TokenService;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use log::{debug, info, warn};
use rand::RngCore;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct UmaService {
    store: Arc<dyn CredentialStore>,
    scopes: Arc<ScopeCatalog>,
    tokens: TokenService,
    issuer: String,
    ticket_ttl: Duration,
}

impl UmaService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        scopes: Arc<ScopeCatalog>,
        tokens: TokenService,
        issuer: &str,
        ticket_ttl_seconds: i64,
    ) -> Self {
        Self {
            store,
            scopes,
            tokens,
            issuer: issuer.to_string(),
            ticket_ttl: Duration::seconds(ticket_ttl_seconds),
        }
    }

    // ----------------------------- resource sets ---------------------------

    /// Register a resource set on behalf of its owner. Restricted and
    /// reserved scopes are silently dropped from the set and its policies.
    pub async fn create_resource_set(
        &self,
        mut resource_set: ResourceSet,
        owner: &Principal,
        client_id: &str,
    ) -> Result<ResourceSet, AuthError> {
        resource_set.id = Uuid::new_v4().to_string();
        resource_set.owner = owner.username.clone();
        resource_set.client_id = Some(client_id.to_string());
        self.sanitize_scopes(&mut resource_set);
        self.store.save_resource_set(&resource_set).await?;
        debug!(
            "Registered resource set {} for {}",
            resource_set.id, resource_set.owner
        );
        Ok(resource_set)
    }

    pub async fn get_resource_set(&self, id: &str) -> Result<ResourceSet, AuthError> {
        self.store
            .get_resource_set(id)
            .await?
            .ok_or_else(|| AuthError::not_found("Resource set does not exist"))
    }

    pub async fn resource_sets_for_owner(
        &self,
        owner: &str,
    ) -> Result<Vec<ResourceSet>, AuthError> {
        Ok(self.store.get_resource_sets_for_owner(owner).await?)
    }

    /// Replace a resource set. Only the owner may do this; id, owner and
    /// registering client are carried over from the stored record.
    pub async fn update_resource_set(
        &self,
        id: &str,
        mut updated: ResourceSet,
        requester: &Principal,
    ) -> Result<ResourceSet, AuthError> {
        let existing = self.get_resource_set(id).await?;
        if existing.owner != requester.username {
            return Err(AuthError::not_authorized(
                "Only the resource owner may modify a resource set",
            ));
        }
        updated.id = existing.id;
        updated.owner = existing.owner;
        updated.client_id = existing.client_id;
        self.sanitize_scopes(&mut updated);
        self.store.save_resource_set(&updated).await?;
        Ok(updated)
    }

    pub async fn delete_resource_set(
        &self,
        id: &str,
        requester: &Principal,
    ) -> Result<(), AuthError> {
        let existing = self.get_resource_set(id).await?;
        if existing.owner != requester.username {
            return Err(AuthError::not_authorized(
                "Only the resource owner may delete a resource set",
            ));
        }
        self.store.delete_resource_set(id).await?;
        Ok(())
    }

    fn sanitize_scopes(&self, resource_set: &mut ResourceSet) {
        resource_set.scopes = self.scopes.strip_restricted_and_reserved(&resource_set.scopes);
        for policy in &mut resource_set.policies {
            policy.scopes = self.scopes.strip_restricted_and_reserved(&policy.scopes);
        }
    }

    // --------------------------- permission tickets ------------------------

    /// Register a permission request against a resource set, yielding the
    /// opaque ticket the client later presents for authorization. The
    /// caller must be the resource owner and the requested scopes must be
    /// covered by the resource set's scopes.
    pub async fn register_permission(
        &self,
        resource_set_id: &str,
        requested_scope: HashSet<String>,
        requester: &Principal,
    ) -> Result<PermissionTicket, AuthError> {
        let resource_set = self.get_resource_set(resource_set_id).await?;
        if resource_set.owner != requester.username {
            return Err(AuthError::not_authorized(
                "Only the resource owner may register permissions",
            ));
        }

        let scopes = self.scopes.strip_restricted_and_reserved(&requested_scope);
        if !self.scopes.scopes_match(&resource_set.scopes, &scopes) {
            return Err(AuthError::invalid_scope(
                "Requested scopes are not registered on the resource set",
            ));
        }

        let ticket = PermissionTicket {
            ticket: random_ticket(),
            permission: Permission {
                resource_set_id: resource_set.id.clone(),
                scopes,
            },
            claims_supplied: Vec::new(),
            expiration: Utc::now() + self.ticket_ttl,
        };
        self.store.save_ticket(&ticket).await?;
        debug!("Issued permission ticket for resource set {}", resource_set.id);
        Ok(ticket)
    }

    /// Attach supplied claims to a pending ticket. Claims accumulate
    /// across rounds; resubmitting a claim already present is a no-op.
    pub async fn supply_claims(
        &self,
        ticket_value: &str,
        claims: Vec<Claim>,
    ) -> Result<PermissionTicket, AuthError> {
        let mut ticket = self.lookup_ticket(ticket_value).await?;
        if merge_claims(&mut ticket.claims_supplied, claims) {
            self.store.save_ticket(&ticket).await?;
        }
        Ok(ticket)
    }

    // ------------------------------ authorization --------------------------

    /// Decide a pending ticket for the requesting party.
    ///
    /// The end user's session claims are merged into the ticket first.
    /// Policies are evaluated in their stored order against the claims
    /// supplied so far; the first fully satisfied policy wins and an RPT
    /// downscoped to that policy is minted. Otherwise the ticket survives
    /// and the error names the claims still missing from the closest
    /// policy.
    pub async fn authorize(
        &self,
        ticket_value: &str,
        presented_rpt: Option<&str>,
        requesting: &AuthenticationHolder,
    ) -> Result<AccessToken, AuthError> {
        let mut ticket = self.lookup_ticket(ticket_value).await?;

        if merge_claims(&mut ticket.claims_supplied, self.session_claims(requesting)) {
            self.store.save_ticket(&ticket).await?;
        }

        let resource_set = self
            .store
            .get_resource_set(&ticket.permission.resource_set_id)
            .await?
            .ok_or_else(|| AuthError::not_found("Resource set no longer exists"))?;

        if resource_set.policies.is_empty() {
            return Err(AuthError::not_authorized(
                "Resource set has no access policy",
            ));
        }

        let candidates: Vec<&Policy> = resource_set
            .policies
            .iter()
            .filter(|p| self.scopes.scopes_match(&p.scopes, &ticket.permission.scopes))
            .collect();
        if candidates.is_empty() {
            return Err(AuthError::not_authorized(
                "No policy covers the requested scopes",
            ));
        }

        for policy in &candidates {
            if unmatched_claims(policy, &ticket.claims_supplied).is_empty() {
                return self.grant(&ticket, policy, presented_rpt, requesting).await;
            }
        }

        // No policy satisfied; point the caller at the one missing the
        // fewest claims and keep the ticket alive for the next round.
        let closest = candidates
            .iter()
            .min_by_key(|p| unmatched_claims(p, &ticket.claims_supplied).len())
            .copied()
            .ok_or_else(|| AuthError::internal("Policy selection failed"))?;
        let missing: Vec<Value> = unmatched_claims(closest, &ticket.claims_supplied)
            .into_iter()
            .map(claim_descriptor)
            .collect();
        Err(AuthError::need_info(&ticket.ticket, Value::Array(missing)))
    }

    async fn grant(
        &self,
        ticket: &PermissionTicket,
        policy: &Policy,
        presented_rpt: Option<&str>,
        requesting: &AuthenticationHolder,
    ) -> Result<AccessToken, AuthError> {
        // Atomic consume: of two concurrent authorizations, one loses here.
        if self.store.consume_ticket(&ticket.ticket).await?.is_none() {
            return Err(AuthError::invalid_grant("Permission ticket is invalid"));
        }

        if let Some(rpt_value) = presented_rpt {
            self.retire_presented_rpt(rpt_value, &requesting.client_id).await?;
        }

        let rpt = self
            .tokens
            .create_rpt(requesting, policy.scopes.clone(), ticket.permission.clone())
            .await?;
        info!(
            "Granted RPT for resource set {} under policy {}",
            ticket.permission.resource_set_id, policy.name
        );
        Ok(rpt)
    }

    /// A newly granted RPT replaces the one presented with the ticket.
    async fn retire_presented_rpt(
        &self,
        rpt_value: &str,
        requesting_client_id: &str,
    ) -> Result<(), AuthError> {
        match self.tokens.get_access_token(rpt_value).await? {
            Some(token) if token.client_id == requesting_client_id => {
                debug!("Revoking superseded RPT {}", token.id);
                self.tokens.revoke_access_token(&token).await
            }
            Some(token) => {
                warn!(
                    "Client {} presented an RPT owned by {}; leaving it in place",
                    requesting_client_id, token.client_id
                );
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn lookup_ticket(&self, ticket_value: &str) -> Result<PermissionTicket, AuthError> {
        let ticket = self
            .store
            .get_ticket(ticket_value)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("Permission ticket is invalid"))?;
        if ticket.is_expired(Utc::now()) {
            debug!("Permission ticket expired; removing on read");
            self.store.delete_ticket(&ticket.ticket).await?;
            return Err(AuthError::invalid_grant("Permission ticket has expired"));
        }
        Ok(ticket)
    }

    /// Claims derived from the requesting party's authenticated session.
    fn session_claims(&self, requesting: &AuthenticationHolder) -> Vec<Claim> {
        vec![Claim::new(
            "sub",
            json!(requesting.principal.username),
            &self.issuer,
        )]
    }

    // -------------------------------- sweeps -------------------------------

    /// Drop permission tickets past their expiration. A failed delete is
    /// logged and the batch continues.
    pub async fn clear_expired_tickets(&self) -> Result<u64, AuthError> {
        let now = Utc::now();
        let mut removed = 0u64;
        for ticket in self.store.expired_tickets(now).await? {
            match self.store.delete_ticket(&ticket.ticket).await {
                Ok(()) => removed += 1,
                Err(err) => warn!("Failed to delete expired ticket: {}", err),
            }
        }
        if removed > 0 {
            info!("Cleared {} expired permission tickets", removed);
        }
        Ok(removed)
    }
}

/// Whether a supplied claim satisfies a required one: same name, issuer
/// sets intersect (an empty requirement accepts any issuer) and values
/// are equal (a null requirement accepts any value).
fn claim_matches(required: &Claim, supplied: &Claim) -> bool {
    if required.name != supplied.name {
        return false;
    }
    if !required.issuer.is_empty() && required.issuer.is_disjoint(&supplied.issuer) {
        return false;
    }
    required.value.is_null() || required.value == supplied.value
}

fn unmatched_claims<'a>(policy: &'a Policy, supplied: &[Claim]) -> Vec<&'a Claim> {
    policy
        .claims_required
        .iter()
        .filter(|required| !supplied.iter().any(|s| claim_matches(required, s)))
        .collect()
}

/// Add claims not already present. Returns whether anything changed.
fn merge_claims(existing: &mut Vec<Claim>, incoming: Vec<Claim>) -> bool {
    let mut changed = false;
    for claim in incoming {
        if !existing.contains(&claim) {
            existing.push(claim);
            changed = true;
        }
    }
    changed
}

/// Wire descriptor of a claim still to be supplied. The expected value
/// stays server-side.
fn claim_descriptor(claim: &Claim) -> Value {
    let mut issuer: Vec<&String> = claim.issuer.iter().collect();
    issuer.sort();
    let mut formats: Vec<&String> = claim.claim_token_format.iter().collect();
    formats.sort();
    json!({
        "name": claim.name,
        "friendly_name": claim.friendly_name,
        "claim_type": claim.claim_type,
        "issuer": issuer,
        "claim_token_format": formats,
    })
}

fn random_ticket() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

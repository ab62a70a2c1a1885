// Membership registry: the three-tier roster on each business and the
// mirrored role entries on user records. Roster and mirror are one logical
// fact stored twice; every mutation here writes the roster first (the
// invariant-checking side) and the mirror second, surfacing a
// `PartialCommit` when the second write cannot follow.

use futures::stream::TryStreamExt;
use mongodb::bson::{DateTime, doc, oid::ObjectId};
use rand::Rng;
use serde::Serialize;
use std::time::{Duration, SystemTime};

use crate::error::AppError;
use crate::models::{Business, BusinessRole, JoinCode, MemberSlot, User};

use super::{
    AppState, JOIN_CODE_TTL_SECONDS, is_duplicate_key, second_phase, second_phase_missing,
    sequence::{ALLOC_MAX_RETRIES, next_free_number},
};

pub async fn create_user(state: &AppState, email: &str, username: &str) -> Result<ObjectId, AppError> {
    if email.trim().is_empty() || username.trim().is_empty() {
        return Err(AppError::Validation("email and username are required".into()));
    }

    let res = state
        .users
        .insert_one(User {
            id: None,
            email: email.to_string(),
            username: username.to_string(),
            business_roles: Vec::new(),
        })
        .await
        .map_err(|err| {
            if is_duplicate_key(&err) {
                AppError::Conflict("email is already registered".into())
            } else {
                AppError::Storage(err)
            }
        })?;

    res.inserted_id
        .as_object_id()
        .ok_or(AppError::NotFound("inserted user id"))
}

pub async fn get_user_by_email(state: &AppState, email: &str) -> Result<Option<User>, AppError> {
    state
        .users
        .find_one(doc! { "email": email })
        .await
        .map_err(Into::into)
}

/// Creates a business with the registering user as admin, member number 1,
/// then mirrors the admin role onto the user record.
#[allow(clippy::too_many_arguments)]
pub async fn create_business(
    state: &AppState,
    user_id: &ObjectId,
    name: &str,
    branch: Option<&str>,
    address: &str,
    phone: &str,
    tax_id: &str,
    registration_number: &str,
    logo_url: Option<String>,
) -> Result<ObjectId, AppError> {
    if name.trim().is_empty() || address.trim().is_empty() || phone.trim().is_empty() {
        return Err(AppError::Validation(
            "name, address and phone are required".into(),
        ));
    }
    let branch = branch.filter(|b| !b.trim().is_empty()).unwrap_or("main");

    let user = state
        .users
        .find_one(doc! { "_id": user_id })
        .await?
        .ok_or(AppError::NotFound("user"))?;

    let duplicate = state
        .businesses
        .find_one(doc! { "$or": [
            { "phone": phone },
            { "address": address },
            { "name": name, "branch": branch },
        ] })
        .await?;
    if duplicate.is_some() {
        return Err(AppError::Conflict(
            "phone, address or this branch of the business is already taken".into(),
        ));
    }

    let res = state
        .businesses
        .insert_one(Business {
            id: None,
            name: name.to_string(),
            branch: branch.to_string(),
            address: address.to_string(),
            phone: phone.to_string(),
            tax_id: tax_id.to_string(),
            registration_number: registration_number.to_string(),
            logo_url: logo_url.unwrap_or_else(|| "-".to_string()),
            admin: MemberSlot {
                user_id: *user_id,
                member_number: 1,
            },
            accountants: Vec::new(),
            viewers: Vec::new(),
            join_code: None,
        })
        .await
        .map_err(|err| {
            if is_duplicate_key(&err) {
                AppError::Conflict("this branch of the business already exists".into())
            } else {
                AppError::Storage(err)
            }
        })?;
    let business_id = res
        .inserted_id
        .as_object_id()
        .ok_or(AppError::NotFound("inserted business id"))?;

    tracing::info!(%business_id, admin = %user.email, "business created");

    // Second phase: mirror the admin role onto the user.
    let res = second_phase(
        "business creation",
        "admin role mirror",
        state
            .users
            .update_one(
                doc! { "_id": user_id },
                doc! { "$push": { "business_roles": {
                    "business_id": business_id,
                    "role": BusinessRole::Admin.as_str(),
                } } },
            )
            .await,
    )?;
    if res.matched_count == 0 {
        return Err(second_phase_missing("business creation", "admin role mirror"));
    }

    Ok(business_id)
}

pub async fn get_business(
    state: &AppState,
    business_id: &ObjectId,
) -> Result<Business, AppError> {
    state
        .businesses
        .find_one(doc! { "_id": business_id })
        .await?
        .ok_or(AppError::NotFound("business"))
}

/// Roster lookup used by the request boundary to resolve a caller's role.
pub async fn resolve_role(
    state: &AppState,
    business_id: &ObjectId,
    user_id: &ObjectId,
) -> Result<Option<BusinessRole>, AppError> {
    let business = state
        .businesses
        .find_one(doc! { "_id": business_id })
        .await?;
    Ok(business.and_then(|b| b.role_of(user_id)))
}

#[derive(Debug, Clone, Serialize)]
pub struct UserBusiness {
    pub business_id: ObjectId,
    pub name: String,
    pub branch: String,
    pub logo_url: String,
    pub role: BusinessRole,
}

pub async fn list_user_businesses(
    state: &AppState,
    user_id: &ObjectId,
) -> Result<Vec<UserBusiness>, AppError> {
    let user = state
        .users
        .find_one(doc! { "_id": user_id })
        .await?
        .ok_or(AppError::NotFound("user"))?;

    let mut out = Vec::new();
    for entry in &user.business_roles {
        if let Some(business) = state
            .businesses
            .find_one(doc! { "_id": entry.business_id })
            .await?
        {
            out.push(UserBusiness {
                business_id: entry.business_id,
                name: business.name,
                branch: business.branch,
                logo_url: business.logo_url,
                role: entry.role,
            });
        }
    }
    Ok(out)
}

/// Issues a fresh invitation code, overwriting any previous one. Codes are
/// collision-checked system-wide because redemption looks them up without
/// tenant context.
pub async fn issue_join_code(
    state: &AppState,
    business_id: &ObjectId,
    caller_role: BusinessRole,
) -> Result<JoinCode, AppError> {
    if !caller_role.is_admin() {
        return Err(AppError::Unauthorized("only the admin can issue join codes"));
    }

    let code = loop {
        let candidate = format!("{:06x}", rand::rng().random::<u32>() & 0x00ff_ffff);
        let taken = state
            .businesses
            .find_one(doc! { "join_code.code": &candidate })
            .await?;
        if taken.is_none() {
            break candidate;
        }
    };

    let expires_at = DateTime::from_system_time(
        SystemTime::now() + Duration::from_secs(JOIN_CODE_TTL_SECONDS),
    );
    let join_code = JoinCode {
        code,
        expires_at,
    };

    let res = state
        .businesses
        .update_one(
            doc! { "_id": business_id },
            doc! { "$set": { "join_code": {
                "code": &join_code.code,
                "expires_at": join_code.expires_at,
            } } },
        )
        .await?;
    if res.matched_count == 0 {
        return Err(AppError::NotFound("business"));
    }

    Ok(join_code)
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinOutcome {
    pub business_id: ObjectId,
    pub name: String,
    pub branch: String,
    pub member_number: u32,
    pub already_member: bool,
}

/// Redeems an invitation code, joining the user as a viewer with the
/// smallest unused member number. Idempotent for a user who already holds a
/// role in the business.
pub async fn redeem_join_code(
    state: &AppState,
    user_id: &ObjectId,
    code: &str,
) -> Result<JoinOutcome, AppError> {
    let business = state
        .businesses
        .find_one(doc! { "join_code.code": code })
        .await?
        .ok_or(AppError::CodeInvalid)?;
    let business_id = business.id.ok_or(AppError::NotFound("business id"))?;

    // Expiry is a read-time wall-clock comparison; no timer invalidates the
    // stored code.
    let join_code = business.join_code.as_ref().ok_or(AppError::CodeInvalid)?;
    if join_code.expires_at.to_system_time() <= SystemTime::now() {
        return Err(AppError::CodeExpired);
    }

    if let Some(role) = business.role_of(user_id) {
        let slot = match role {
            BusinessRole::Admin => Some(&business.admin),
            BusinessRole::Accountant => {
                business.accountants.iter().find(|m| &m.user_id == user_id)
            }
            BusinessRole::Viewer => business.viewers.iter().find(|m| &m.user_id == user_id),
        };
        // role_of and the slot lookup read the same roster arrays; a miss
        // here means the roster itself is corrupt.
        let member_number = slot.map(|m| m.member_number).ok_or_else(|| {
            AppError::Invariant("roster lists the member without a slot".into())
        })?;
        return Ok(JoinOutcome {
            business_id,
            name: business.name,
            branch: business.branch,
            member_number,
            already_member: true,
        });
    }

    // Two concurrent redeemers may compute the same gap; the guarded push
    // below only matches while the number is still free, so the loser
    // recomputes against a fresh roster.
    let mut attempts = 0;
    let member_number = loop {
        let roster = get_business(state, &business_id).await?;
        if roster.role_of(user_id).is_some() {
            // Lost a race against our own retry or a duplicate request.
            return Box::pin(redeem_join_code(state, user_id, code)).await;
        }
        let member_number = next_free_number(&roster.member_numbers());

        let res = state
            .businesses
            .update_one(
                doc! {
                    "_id": business_id,
                    "admin.member_number": { "$ne": member_number as i32 },
                    "accountants.member_number": { "$ne": member_number as i32 },
                    "viewers.member_number": { "$ne": member_number as i32 },
                    "viewers.user_id": { "$ne": user_id },
                },
                doc! { "$push": { "viewers": {
                    "user_id": user_id,
                    "member_number": member_number as i32,
                } } },
            )
            .await?;
        if res.modified_count == 1 {
            break member_number;
        }

        attempts += 1;
        if attempts >= ALLOC_MAX_RETRIES {
            return Err(AppError::AllocationContended);
        }
    };

    // Second phase: mirror the viewer role onto the user.
    let res = second_phase(
        "roster join",
        "viewer role mirror",
        state
            .users
            .update_one(
                doc! { "_id": user_id },
                doc! { "$push": { "business_roles": {
                    "business_id": business_id,
                    "role": BusinessRole::Viewer.as_str(),
                } } },
            )
            .await,
    )?;
    if res.matched_count == 0 {
        return Err(second_phase_missing("roster join", "viewer role mirror"));
    }

    tracing::info!(%business_id, %user_id, member_number, "member joined as viewer");

    Ok(JoinOutcome {
        business_id,
        name: business.name,
        branch: business.branch,
        member_number,
        already_member: false,
    })
}

/// viewer -> accountant. The member keeps their number.
pub async fn promote_to_accountant(
    state: &AppState,
    business_id: &ObjectId,
    caller_role: BusinessRole,
    member_number: u32,
) -> Result<(), AppError> {
    if !caller_role.is_admin() {
        return Err(AppError::Unauthorized("only the admin can promote members"));
    }

    let business = get_business(state, business_id).await?;
    let slot = business
        .viewers
        .iter()
        .find(|m| m.member_number == member_number)
        .cloned()
        .ok_or(AppError::MemberNotFound {
            member_number,
            expected_tier: "viewers",
        })?;

    // Phase one: move the slot between tiers in a single roster write; the
    // filter re-verifies the member is still a viewer.
    let res = state
        .businesses
        .update_one(
            doc! { "_id": business_id, "viewers.member_number": member_number as i32 },
            doc! {
                "$pull": { "viewers": { "member_number": member_number as i32 } },
                "$push": { "accountants": {
                    "user_id": slot.user_id,
                    "member_number": member_number as i32,
                } },
            },
        )
        .await?;
    if res.matched_count == 0 {
        return Err(AppError::MemberNotFound {
            member_number,
            expected_tier: "viewers",
        });
    }

    mirror_role(state, &slot.user_id, business_id, BusinessRole::Accountant, "roster promotion").await
}

/// accountant -> admin. The current admin steps down to accountant keeping
/// their member number, so the business never has zero or two admins.
pub async fn promote_to_admin(
    state: &AppState,
    business_id: &ObjectId,
    caller_role: BusinessRole,
    member_number: u32,
) -> Result<(), AppError> {
    if !caller_role.is_admin() {
        return Err(AppError::Unauthorized("only the admin can promote members"));
    }

    let business = get_business(state, business_id).await?;
    let promoted = business
        .accountants
        .iter()
        .find(|m| m.member_number == member_number)
        .cloned()
        .ok_or(AppError::MemberNotFound {
            member_number,
            expected_tier: "accountants",
        })?;
    let old_admin = business.admin.clone();

    // Phase one: swap admin and rewrite the accountants array in one
    // document write, guarded against a concurrent admin change.
    let accountants: Vec<_> = business
        .accountants
        .iter()
        .filter(|m| m.member_number != member_number)
        .chain(std::iter::once(&old_admin))
        .map(|m| doc! { "user_id": m.user_id, "member_number": m.member_number as i32 })
        .collect();
    let res = state
        .businesses
        .update_one(
            doc! {
                "_id": business_id,
                "admin.user_id": old_admin.user_id,
                "accountants.member_number": member_number as i32,
            },
            doc! { "$set": {
                "admin": {
                    "user_id": promoted.user_id,
                    "member_number": promoted.member_number as i32,
                },
                "accountants": accountants,
            } },
        )
        .await?;
    if res.matched_count == 0 {
        return Err(AppError::Conflict(
            "roster changed concurrently; re-read and retry".into(),
        ));
    }

    tracing::info!(%business_id, new_admin = %promoted.user_id, "admin handover");

    // Phase two: mirror both affected users.
    mirror_role(state, &old_admin.user_id, business_id, BusinessRole::Accountant, "admin handover").await?;
    mirror_role(state, &promoted.user_id, business_id, BusinessRole::Admin, "admin handover").await
}

/// accountant -> viewer. The admin cannot be demoted through this path.
pub async fn demote_to_viewer(
    state: &AppState,
    business_id: &ObjectId,
    caller_role: BusinessRole,
    member_number: u32,
) -> Result<(), AppError> {
    if !caller_role.is_admin() {
        return Err(AppError::Unauthorized("only the admin can demote members"));
    }

    let business = get_business(state, business_id).await?;
    let slot = business
        .accountants
        .iter()
        .find(|m| m.member_number == member_number)
        .cloned()
        .ok_or(AppError::MemberNotFound {
            member_number,
            expected_tier: "accountants",
        })?;

    let res = state
        .businesses
        .update_one(
            doc! { "_id": business_id, "accountants.member_number": member_number as i32 },
            doc! {
                "$pull": { "accountants": { "member_number": member_number as i32 } },
                "$push": { "viewers": {
                    "user_id": slot.user_id,
                    "member_number": member_number as i32,
                } },
            },
        )
        .await?;
    if res.matched_count == 0 {
        return Err(AppError::MemberNotFound {
            member_number,
            expected_tier: "accountants",
        });
    }

    mirror_role(state, &slot.user_id, business_id, BusinessRole::Viewer, "roster demotion").await
}

/// Removes the caller from whichever tier they occupy. Their member number
/// returns to the free pool for the next joiner.
pub async fn leave_business(
    state: &AppState,
    business_id: &ObjectId,
    user_id: &ObjectId,
) -> Result<(), AppError> {
    let business = get_business(state, business_id).await?;
    let role = business
        .role_of(user_id)
        .ok_or(AppError::NotFound("membership"))?;

    let tier = match role {
        BusinessRole::Admin => return Err(AppError::AdminCannotLeave),
        BusinessRole::Accountant => "accountants",
        BusinessRole::Viewer => "viewers",
    };

    let res = state
        .businesses
        .update_one(
            doc! { "_id": business_id },
            doc! { "$pull": { tier: { "user_id": user_id } } },
        )
        .await?;
    if res.modified_count == 0 {
        return Err(AppError::NotFound("membership"));
    }

    // Second phase: drop the mirrored entry from the user.
    let res = second_phase(
        "roster removal",
        "role mirror removal",
        state
            .users
            .update_one(
                doc! { "_id": user_id },
                doc! { "$pull": { "business_roles": { "business_id": business_id } } },
            )
            .await,
    )?;
    if res.matched_count == 0 {
        return Err(second_phase_missing("roster removal", "role mirror removal"));
    }

    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberView {
    pub user_id: ObjectId,
    pub member_number: u32,
    pub role: BusinessRole,
    pub username: String,
    pub email: String,
}

pub async fn list_members(
    state: &AppState,
    business_id: &ObjectId,
    roles: Option<&[BusinessRole]>,
) -> Result<Vec<MemberView>, AppError> {
    let business = get_business(state, business_id).await?;

    let wanted = |role: BusinessRole| roles.is_none_or(|r| r.contains(&role));
    let mut slots: Vec<(MemberSlot, BusinessRole)> = Vec::new();
    if wanted(BusinessRole::Admin) {
        slots.push((business.admin.clone(), BusinessRole::Admin));
    }
    if wanted(BusinessRole::Accountant) {
        slots.extend(
            business
                .accountants
                .iter()
                .cloned()
                .map(|m| (m, BusinessRole::Accountant)),
        );
    }
    if wanted(BusinessRole::Viewer) {
        slots.extend(
            business
                .viewers
                .iter()
                .cloned()
                .map(|m| (m, BusinessRole::Viewer)),
        );
    }

    let ids: Vec<ObjectId> = slots.iter().map(|(m, _)| m.user_id).collect();
    let mut users = Vec::new();
    let mut cursor = state.users.find(doc! { "_id": { "$in": ids } }).await?;
    while let Some(user) = cursor.try_next().await? {
        users.push(user);
    }

    let mut members = Vec::new();
    for (slot, role) in slots {
        let user = users
            .iter()
            .find(|u| u.id == Some(slot.user_id))
            .ok_or(AppError::NotFound("member user record"))?;
        members.push(MemberView {
            user_id: slot.user_id,
            member_number: slot.member_number,
            role,
            username: user.username.clone(),
            email: user.email.clone(),
        });
    }
    Ok(members)
}

/// Phase two of every roster mutation: update the mirrored role entry on
/// the affected user so roster and mirror stay one fact.
async fn mirror_role(
    state: &AppState,
    user_id: &ObjectId,
    business_id: &ObjectId,
    role: BusinessRole,
    committed: &'static str,
) -> Result<(), AppError> {
    let res = second_phase(
        committed,
        "user role mirror",
        state
            .users
            .update_one(
                doc! { "_id": user_id, "business_roles.business_id": business_id },
                doc! { "$set": { "business_roles.$.role": role.as_str() } },
            )
            .await,
    )?;
    if res.matched_count == 0 {
        return Err(second_phase_missing(committed, "user role mirror"));
    }
    Ok(())
}

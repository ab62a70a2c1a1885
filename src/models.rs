// models.rs
// Domain models for the MongoDB collections and the closed enums every
// consistency rule matches on.

use mongodb::bson::{DateTime, oid::ObjectId};
use serde::{Deserialize, Serialize};

/// Role tiers within a business roster, from highest to lowest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BusinessRole {
    Admin,
    Accountant,
    Viewer,
}

impl BusinessRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessRole::Admin => "admin",
            BusinessRole::Accountant => "accountant",
            BusinessRole::Viewer => "viewer",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, BusinessRole::Admin)
    }

    /// Admins and accountants may mutate tenant data; viewers only read.
    pub fn can_write(&self) -> bool {
        matches!(self, BusinessRole::Admin | BusinessRole::Accountant)
    }
}

/// One occupied slot in a business roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberSlot {
    pub user_id: ObjectId,
    pub member_number: u32,
}

/// Short-lived invitation code embedded on the business document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinCode {
    pub code: String,
    pub expires_at: DateTime,
}

/// Tenant root. Holds the three-tier roster; `admin` is always exactly one
/// slot, never empty and never duplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub branch: String,
    pub address: String,
    pub phone: String,
    pub tax_id: String,
    pub registration_number: String,
    pub logo_url: String,
    pub admin: MemberSlot,
    pub accountants: Vec<MemberSlot>,
    pub viewers: Vec<MemberSlot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_code: Option<JoinCode>,
}

impl Business {
    /// Member numbers currently held across admin + accountants + viewers.
    pub fn member_numbers(&self) -> Vec<u32> {
        let mut numbers = vec![self.admin.member_number];
        numbers.extend(self.accountants.iter().map(|m| m.member_number));
        numbers.extend(self.viewers.iter().map(|m| m.member_number));
        numbers
    }

    /// Roster role of a user, if they belong to this business. The roster is
    /// the authoritative copy; the user record only mirrors it.
    pub fn role_of(&self, user_id: &ObjectId) -> Option<BusinessRole> {
        if &self.admin.user_id == user_id {
            return Some(BusinessRole::Admin);
        }
        if self.accountants.iter().any(|m| &m.user_id == user_id) {
            return Some(BusinessRole::Accountant);
        }
        if self.viewers.iter().any(|m| &m.user_id == user_id) {
            return Some(BusinessRole::Viewer);
        }
        None
    }
}

/// Mirrored role entry stored on the user document, one per business the
/// user belongs to. Must always equal the roster entry on the business.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessRoleEntry {
    pub business_id: ObjectId,
    pub role: BusinessRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub email: String,
    pub username: String,
    pub business_roles: Vec<BusinessRoleEntry>,
}

/// Session document linking a bearer token to a user and expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub token: String,
    pub user_id: ObjectId,
    pub expires_at: DateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Goods,
    Service,
}

/// Tenant-scoped inventory item. Services are pinned to quantity 1 and the
/// "-" unit at write time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub business_id: ObjectId,
    pub name: String,
    pub description: String,
    pub item_type: ItemType,
    pub quantity_on_hand: i64,
    pub price: f64,
    pub unit: String,
    pub img_url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Quotation,
    Invoice,
    Receipt,
    PurchaseOrder,
}

impl DocumentType {
    /// Two-letter code prefix; callers may route a document code to its type
    /// from this prefix without a lookup.
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentType::Quotation => "QO",
            DocumentType::Invoice => "IV",
            DocumentType::Receipt => "RE",
            DocumentType::PurchaseOrder => "PO",
        }
    }

    pub fn from_code(code: &str) -> Option<DocumentType> {
        match code.get(..2)? {
            "QO" => Some(DocumentType::Quotation),
            "IV" => Some(DocumentType::Invoice),
            "RE" => Some(DocumentType::Receipt),
            "PO" => Some(DocumentType::PurchaseOrder),
            _ => None,
        }
    }

    /// Status reached when a draft is advanced. Quotations and receipts have
    /// no response phase and complete directly.
    pub fn advance_target(&self) -> DocumentStatus {
        match self {
            DocumentType::Quotation | DocumentType::Receipt => DocumentStatus::Completed,
            DocumentType::Invoice | DocumentType::PurchaseOrder => DocumentStatus::WaitForResponse,
        }
    }

    /// Only invoices and purchase orders settle against inventory.
    pub fn settles_inventory(&self) -> bool {
        matches!(self, DocumentType::Invoice | DocumentType::PurchaseOrder)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    WaitForResponse,
    Completed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::WaitForResponse => "wait_for_response",
            DocumentStatus::Completed => "completed",
        }
    }
}

/// Snapshot of the issuing business at document creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessInfo {
    pub name: String,
    pub address: String,
    pub tax_id: String,
    pub logo_url: String,
    pub phone: String,
}

/// Snapshot of the authoring member at document creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorInfo {
    pub user_id: ObjectId,
    pub name: String,
    pub email: String,
}

/// Snapshot of the trading contact at document creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactInfo {
    pub business_name: String,
    pub name: String,
    pub address: String,
    pub tax_id: String,
    pub phone: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub item_id: ObjectId,
    pub name: String,
    pub quantity: i64,
    pub price_per_unit: f64,
    pub tax_rate: f64,
    pub total_cost: f64,
}

/// Commercial document. The info blocks are copies frozen at creation; the
/// living business/contact records may change without altering history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub business_id: ObjectId,
    pub document_type: DocumentType,
    pub document_code: String,
    pub document_status: DocumentStatus,
    pub business_info: BusinessInfo,
    pub author_info: AuthorInfo,
    pub contact_info: ContactInfo,
    pub remark: String,
    pub line_items: Vec<LineItem>,
    pub total_cost: f64,
    pub create_date: DateTime,
    pub expire_date: DateTime,
    /// Set only while status is draft; cleared on the first transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_expire_at: Option<DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_received_at: Option<DateTime>,
    /// Invoice only: payment terms in days, expire date minus create date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quotation_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Cash,
    Bank,
    Ewallet,
}

impl ProviderType {
    /// Three-letter shortened-code prefix, unique per provider type.
    pub fn code_prefix(&self) -> &'static str {
        match self {
            ProviderType::Cash => "CSH",
            ProviderType::Bank => "BNK",
            ProviderType::Ewallet => "EWL",
        }
    }

    pub fn from_code(code: &str) -> Option<ProviderType> {
        match code.get(..3)? {
            "CSH" => Some(ProviderType::Cash),
            "BNK" => Some(ProviderType::Bank),
            "EWL" => Some(ProviderType::Ewallet),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BankAccountType {
    Current,
    Saving,
    FixedDeposit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EwalletAccountType {
    ECommerce,
}

/// System-wide bank or e-wallet brand referenced by financial accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialProvider {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub provider_type: ProviderType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialAccount {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub business_id: ObjectId,
    pub shortened_code: String,
    pub account_name: String,
    pub provider_type: ProviderType,
    pub balance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_account_type: Option<BankAccountType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ewallet_account_type: Option<EwalletAccountType>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
}

/// Append-only record of a balance-affecting event. Never mutated; account
/// deletion leaves the reference dangling on purpose to keep audit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub business_id: ObjectId,
    pub financial_account_id: ObjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_reference: Option<String>,
    pub transaction_type: TransactionType,
    pub amount: f64,
    pub comment: String,
    pub created_at: DateTime,
}

use bizledger::error::AppError;
use bizledger::models::{
    BusinessRole, ContactInfo, DocumentStatus, DocumentType, ItemType, LineItem,
};
use bizledger::state::{
    AppState, NewDocument, advance_document, create_business, create_document, create_item,
    create_user, delete_document, get_document, get_item, settle_document, update_document,
    DocumentUpdate,
};
use chrono::{Duration, Utc};
use mongodb::bson::oid::ObjectId;
use std::collections::BTreeSet;

#[path = "common/mod.rs"]
mod common;

struct Fixture {
    state: AppState,
    business_id: ObjectId,
    user_id: ObjectId,
}

async fn fixture(ctx: &common::TestContext, tag: &str) -> Fixture {
    let state = ctx.state.clone();
    let user_id = create_user(&state, &format!("admin@{tag}.test"), "admin")
        .await
        .unwrap();
    let business_id = create_business(
        &state,
        &user_id,
        &format!("{tag} Co"),
        None,
        &format!("{tag} street 1"),
        &format!("0811{tag}"),
        "1234567890123",
        "1234567890123",
        None,
    )
    .await
    .unwrap();
    Fixture {
        state,
        business_id,
        user_id,
    }
}

async fn stocked_item(fx: &Fixture, name: &str, quantity: i64) -> ObjectId {
    create_item(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        name,
        "-",
        ItemType::Goods,
        quantity,
        10.0,
        "pcs",
        None,
    )
    .await
    .unwrap()
}

fn contact() -> ContactInfo {
    ContactInfo {
        business_name: "Counterparty Ltd".into(),
        name: "Jo Counterparty".into(),
        address: "9 Other road".into(),
        tax_id: "9876543210987".into(),
        phone: "0899999999".into(),
        email: "jo@counterparty.test".into(),
    }
}

fn line(item_id: ObjectId, name: &str, quantity: i64) -> LineItem {
    LineItem {
        item_id,
        name: name.into(),
        quantity,
        price_per_unit: 10.0,
        tax_rate: 0.0,
        total_cost: quantity as f64 * 10.0,
    }
}

fn new_document(doc_type: DocumentType, lines: Vec<LineItem>) -> NewDocument {
    let create = Utc::now();
    NewDocument {
        document_type: doc_type,
        document_number: None,
        create_date: create,
        expire_date: create + Duration::days(30),
        contact_info: contact(),
        line_items: lines,
        remark: None,
        quotation_ref: None,
        invoice_ref: None,
    }
}

#[tokio::test]
async fn daily_codes_count_up_and_reuse_freed_ordinals() {
    let ctx = match common::setup_state().await {
        Some(s) => s,
        None => return,
    };
    let fx = fixture(&ctx, "dailycodes").await;
    let item = stocked_item(&fx, "Widget", 100).await;

    let first = create_document(
        &fx.state,
        &fx.business_id,
        &fx.user_id,
        BusinessRole::Admin,
        new_document(DocumentType::Quotation, vec![line(item, "Widget", 1)]),
    )
    .await
    .unwrap();
    let second = create_document(
        &fx.state,
        &fx.business_id,
        &fx.user_id,
        BusinessRole::Admin,
        new_document(DocumentType::Quotation, vec![line(item, "Widget", 2)]),
    )
    .await
    .unwrap();

    assert!(first.document_code.starts_with("QO"));
    assert_eq!(first.document_code.len(), 13);
    assert!(first.document_code.ends_with("001"));
    assert!(second.document_code.ends_with("002"));
    assert_eq!(first.document_status, DocumentStatus::Draft);
    assert!(first.draft_expire_at.is_some());

    // Deleting the first draft frees 001 for the next quotation that day.
    delete_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &first.document_code,
    )
    .await
    .unwrap();
    let third = create_document(
        &fx.state,
        &fx.business_id,
        &fx.user_id,
        BusinessRole::Admin,
        new_document(DocumentType::Quotation, vec![line(item, "Widget", 3)]),
    )
    .await
    .unwrap();
    assert!(third.document_code.ends_with("001"));

    common::teardown(Some(ctx)).await;
}

#[tokio::test]
async fn concurrent_daily_allocation_yields_distinct_codes() {
    let ctx = match common::setup_state().await {
        Some(s) => s,
        None => return,
    };
    let fx = fixture(&ctx, "racecodes").await;
    let item = stocked_item(&fx, "Widget", 100).await;

    // Three creators race for the same daily series; write-time collisions
    // are resolved by the retry loop, never by handing out a taken code.
    let make = || {
        create_document(
            &fx.state,
            &fx.business_id,
            &fx.user_id,
            BusinessRole::Admin,
            new_document(DocumentType::Invoice, vec![line(item, "Widget", 1)]),
        )
    };
    let (a, b, c) = tokio::join!(make(), make(), make());

    let codes: BTreeSet<String> = [a.unwrap(), b.unwrap(), c.unwrap()]
        .into_iter()
        .map(|d| d.document_code)
        .collect();
    assert_eq!(codes.len(), 3);
    assert!(codes.iter().all(|code| code.starts_with("IV") && code.len() == 13));

    common::teardown(Some(ctx)).await;
}

#[tokio::test]
async fn a_document_may_list_the_same_item_on_several_lines() {
    let ctx = match common::setup_state().await {
        Some(s) => s,
        None => return,
    };
    let fx = fixture(&ctx, "repeatlines").await;
    let item = stocked_item(&fx, "Widget", 100).await;

    let invoice = create_document(
        &fx.state,
        &fx.business_id,
        &fx.user_id,
        BusinessRole::Admin,
        new_document(
            DocumentType::Invoice,
            vec![line(item, "Widget", 2), line(item, "Widget", 3)],
        ),
    )
    .await
    .unwrap();
    assert_eq!(invoice.line_items.len(), 2);
    assert_eq!(invoice.total_cost, 50.0);

    // Settlement applies both lines against the one item.
    advance_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &invoice.document_code,
    )
    .await
    .unwrap();
    settle_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &invoice.document_code,
    )
    .await
    .unwrap();
    let stock = get_item(&fx.state, &fx.business_id, &item).await.unwrap();
    assert_eq!(stock.quantity_on_hand, 95);

    // An unknown item on any line still fails creation.
    let err = create_document(
        &fx.state,
        &fx.business_id,
        &fx.user_id,
        BusinessRole::Admin,
        new_document(
            DocumentType::Invoice,
            vec![line(item, "Widget", 1), line(ObjectId::new(), "Ghost", 1)],
        ),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    common::teardown(Some(ctx)).await;
}

#[tokio::test]
async fn drafts_cannot_be_edited_to_reference_unknown_items() {
    let ctx = match common::setup_state().await {
        Some(s) => s,
        None => return,
    };
    let fx = fixture(&ctx, "editghost").await;
    let item = stocked_item(&fx, "Widget", 100).await;

    let draft = create_document(
        &fx.state,
        &fx.business_id,
        &fx.user_id,
        BusinessRole::Admin,
        new_document(DocumentType::Quotation, vec![line(item, "Widget", 1)]),
    )
    .await
    .unwrap();

    let create = Utc::now();
    let err = update_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &draft.document_code,
        DocumentUpdate {
            create_date: create,
            expire_date: create + Duration::days(30),
            contact_info: contact(),
            line_items: vec![line(ObjectId::new(), "Ghost", 1)],
            remark: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    // The rejected edit left the draft untouched.
    let stored = get_document(&fx.state, &fx.business_id, &draft.document_code)
        .await
        .unwrap();
    assert_eq!(stored.line_items.len(), 1);
    assert_eq!(stored.line_items[0].item_id, item);

    common::teardown(Some(ctx)).await;
}

#[tokio::test]
async fn explicit_numbers_collide_within_tenant_and_type() {
    let ctx = match common::setup_state().await {
        Some(s) => s,
        None => return,
    };
    let fx = fixture(&ctx, "explicit").await;
    let item = stocked_item(&fx, "Widget", 100).await;

    let mut input = new_document(DocumentType::Invoice, vec![line(item, "Widget", 1)]);
    input.document_number = Some(42);
    let document = create_document(
        &fx.state,
        &fx.business_id,
        &fx.user_id,
        BusinessRole::Admin,
        input.clone(),
    )
    .await
    .unwrap();
    assert_eq!(document.document_code, "IV00000000042");

    let err = create_document(
        &fx.state,
        &fx.business_id,
        &fx.user_id,
        BusinessRole::Admin,
        input.clone(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // Same number under a different type is a different series.
    input.document_type = DocumentType::Receipt;
    let receipt = create_document(
        &fx.state,
        &fx.business_id,
        &fx.user_id,
        BusinessRole::Admin,
        input,
    )
    .await
    .unwrap();
    assert_eq!(receipt.document_code, "RE00000000042");

    common::teardown(Some(ctx)).await;
}

#[tokio::test]
async fn advance_routes_by_document_type() {
    let ctx = match common::setup_state().await {
        Some(s) => s,
        None => return,
    };
    let fx = fixture(&ctx, "advance").await;
    let item = stocked_item(&fx, "Widget", 100).await;

    let quotation = create_document(
        &fx.state,
        &fx.business_id,
        &fx.user_id,
        BusinessRole::Admin,
        new_document(DocumentType::Quotation, vec![line(item, "Widget", 1)]),
    )
    .await
    .unwrap();
    let status = advance_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &quotation.document_code,
    )
    .await
    .unwrap();
    assert_eq!(status, DocumentStatus::Completed);

    let invoice = create_document(
        &fx.state,
        &fx.business_id,
        &fx.user_id,
        BusinessRole::Admin,
        new_document(DocumentType::Invoice, vec![line(item, "Widget", 1)]),
    )
    .await
    .unwrap();
    assert_eq!(invoice.credit_days, Some(30));
    let status = advance_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &invoice.document_code,
    )
    .await
    .unwrap();
    assert_eq!(status, DocumentStatus::WaitForResponse);

    // An advanced document cannot advance again.
    let err = advance_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &invoice.document_code,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Invariant(_)));

    // The draft retention timestamp is cleared on the first transition.
    let stored = get_document(&fx.state, &fx.business_id, &invoice.document_code)
        .await
        .unwrap();
    assert!(stored.draft_expire_at.is_none());

    common::teardown(Some(ctx)).await;
}

#[tokio::test]
async fn invoice_settlement_decrements_stock_all_or_nothing() {
    let ctx = match common::setup_state().await {
        Some(s) => s,
        None => return,
    };
    let fx = fixture(&ctx, "settle").await;
    let plenty = stocked_item(&fx, "Plenty", 100).await;
    let scarce = stocked_item(&fx, "Scarce", 100).await;

    let invoice = create_document(
        &fx.state,
        &fx.business_id,
        &fx.user_id,
        BusinessRole::Admin,
        new_document(
            DocumentType::Invoice,
            vec![line(plenty, "Plenty", 5), line(scarce, "Scarce", 150)],
        ),
    )
    .await
    .unwrap();
    advance_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &invoice.document_code,
    )
    .await
    .unwrap();

    let err = settle_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &invoice.document_code,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock { item_id } if item_id == scarce));

    // Neither line was applied; the first item was not touched either.
    let untouched = get_item(&fx.state, &fx.business_id, &plenty).await.unwrap();
    assert_eq!(untouched.quantity_on_hand, 100);
    let stored = get_document(&fx.state, &fx.business_id, &invoice.document_code)
        .await
        .unwrap();
    assert_eq!(stored.document_status, DocumentStatus::WaitForResponse);

    // A coverable invoice settles and moves both records.
    let small = create_document(
        &fx.state,
        &fx.business_id,
        &fx.user_id,
        BusinessRole::Admin,
        new_document(DocumentType::Invoice, vec![line(plenty, "Plenty", 5)]),
    )
    .await
    .unwrap();
    advance_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &small.document_code,
    )
    .await
    .unwrap();
    settle_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &small.document_code,
    )
    .await
    .unwrap();

    let drained = get_item(&fx.state, &fx.business_id, &plenty).await.unwrap();
    assert_eq!(drained.quantity_on_hand, 95);
    let settled = get_document(&fx.state, &fx.business_id, &small.document_code)
        .await
        .unwrap();
    assert_eq!(settled.document_status, DocumentStatus::Completed);
    assert!(settled.response_received_at.is_some());

    common::teardown(Some(ctx)).await;
}

#[tokio::test]
async fn purchase_order_settlement_adds_stock() {
    let ctx = match common::setup_state().await {
        Some(s) => s,
        None => return,
    };
    let fx = fixture(&ctx, "postock").await;
    let item = stocked_item(&fx, "Widget", 10).await;

    let po = create_document(
        &fx.state,
        &fx.business_id,
        &fx.user_id,
        BusinessRole::Admin,
        new_document(DocumentType::PurchaseOrder, vec![line(item, "Widget", 40)]),
    )
    .await
    .unwrap();
    assert!(po.document_code.starts_with("PO"));

    advance_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &po.document_code,
    )
    .await
    .unwrap();
    settle_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &po.document_code,
    )
    .await
    .unwrap();

    let restocked = get_item(&fx.state, &fx.business_id, &item).await.unwrap();
    assert_eq!(restocked.quantity_on_hand, 50);

    // Quotations never settle inventory.
    let quotation = create_document(
        &fx.state,
        &fx.business_id,
        &fx.user_id,
        BusinessRole::Admin,
        new_document(DocumentType::Quotation, vec![line(item, "Widget", 1)]),
    )
    .await
    .unwrap();
    let err = settle_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &quotation.document_code,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Invariant(_)));

    common::teardown(Some(ctx)).await;
}

#[tokio::test]
async fn only_drafts_can_be_edited_or_deleted() {
    let ctx = match common::setup_state().await {
        Some(s) => s,
        None => return,
    };
    let fx = fixture(&ctx, "draftonly").await;
    let item = stocked_item(&fx, "Widget", 100).await;

    let invoice = create_document(
        &fx.state,
        &fx.business_id,
        &fx.user_id,
        BusinessRole::Admin,
        new_document(DocumentType::Invoice, vec![line(item, "Widget", 2)]),
    )
    .await
    .unwrap();

    // Editing the draft recomputes the total and the credit terms.
    let create = Utc::now();
    update_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &invoice.document_code,
        DocumentUpdate {
            create_date: create,
            expire_date: create + Duration::days(45),
            contact_info: contact(),
            line_items: vec![line(item, "Widget", 7)],
            remark: Some("rush order".into()),
        },
    )
    .await
    .unwrap();
    let edited = get_document(&fx.state, &fx.business_id, &invoice.document_code)
        .await
        .unwrap();
    assert_eq!(edited.total_cost, 70.0);
    assert_eq!(edited.credit_days, Some(45));
    assert_eq!(edited.remark, "rush order");

    advance_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &invoice.document_code,
    )
    .await
    .unwrap();

    let err = update_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &invoice.document_code,
        DocumentUpdate {
            create_date: create,
            expire_date: create + Duration::days(10),
            contact_info: contact(),
            line_items: vec![line(item, "Widget", 1)],
            remark: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Invariant(_)));

    let err = delete_document(
        &fx.state,
        &fx.business_id,
        BusinessRole::Admin,
        &invoice.document_code,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Invariant(_)));

    common::teardown(Some(ctx)).await;
}

#[tokio::test]
async fn viewers_cannot_mutate_documents() {
    let ctx = match common::setup_state().await {
        Some(s) => s,
        None => return,
    };
    let fx = fixture(&ctx, "viewerdocs").await;
    let item = stocked_item(&fx, "Widget", 100).await;

    let err = create_document(
        &fx.state,
        &fx.business_id,
        &fx.user_id,
        BusinessRole::Viewer,
        new_document(DocumentType::Quotation, vec![line(item, "Widget", 1)]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));

    common::teardown(Some(ctx)).await;
}

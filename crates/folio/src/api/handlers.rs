//! HTTP request handlers.
//!
//! Request bodies are form-encoded and keep the field names of the bookstore's
//! original pages (`ID`, `newID`, `ISBN`, ...). Every response is JSON.

use std::str::FromStr;

use axum::{
    Form, Json,
    extract::{Query, State},
    http::StatusCode,
};
use folio_protocol::{BookField, BookFilter, BookRow, FinanceSummary, Privilege};
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::session::SessionSnapshot;
use crate::worker::WorkerStatus;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub worker: WorkerStatus,
}

/// Health check endpoint. Answers 503 once the backend process is gone.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let worker = state.worker_status();
    let (code, status) = if worker.is_running() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            worker,
        }),
    )
}

/// The current login, as the API reports it.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub identity: Option<String>,
    pub privilege: Privilege,
    pub level: u8,
}

impl From<SessionSnapshot> for SessionResponse {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            level: snapshot.level(),
            identity: snapshot.identity,
            privilege: snapshot.privilege,
        }
    }
}

/// Acknowledgement for operations without a payload.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    fn ok() -> Json<Self> {
        Json(Self { status: "ok" })
    }
}

pub async fn get_session(State(state): State<AppState>) -> Json<SessionResponse> {
    Json(state.store.session().into())
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(rename = "ID")]
    pub id: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> ApiResult<Json<SessionResponse>> {
    let snapshot = state.store.login(&form.id, &form.password).await?;
    Ok(Json(snapshot.into()))
}

pub async fn logout(State(state): State<AppState>) -> ApiResult<Json<SessionResponse>> {
    let snapshot = state.store.logout().await?;
    Ok(Json(snapshot.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterForm {
    #[serde(rename = "newID")]
    pub new_id: String,
    pub new_name: String,
    pub new_password: String,
    pub repeated_password: String,
}

pub async fn register(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> ApiResult<Json<StatusResponse>> {
    confirm_password(&form.new_password, &form.repeated_password)?;
    state
        .store
        .register(&form.new_id, &form.new_password, &form.new_name)
        .await?;
    Ok(StatusResponse::ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordForm {
    pub old_password: String,
    pub new_password: String,
    pub repeated_new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    Form(form): Form<ChangePasswordForm>,
) -> ApiResult<Json<StatusResponse>> {
    confirm_password(&form.new_password, &form.repeated_new_password)?;
    state
        .store
        .change_password(&form.old_password, &form.new_password)
        .await?;
    Ok(StatusResponse::ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUserForm {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub password: String,
    pub repeated_password: String,
    pub priority: String,
    pub user_name: String,
}

pub async fn add_user(
    State(state): State<AppState>,
    Form(form): Form<AddUserForm>,
) -> ApiResult<Json<StatusResponse>> {
    confirm_password(&form.password, &form.repeated_password)?;
    let privilege = Privilege::from_str(&form.priority).map_err(ApiError::BadRequest)?;
    state
        .store
        .add_user(&form.user_id, &form.password, privilege, &form.user_name)
        .await?;
    Ok(StatusResponse::ok())
}

#[derive(Debug, Deserialize)]
pub struct DeleteUserForm {
    #[serde(rename = "userID")]
    pub user_id: String,
}

pub async fn delete_user(
    State(state): State<AppState>,
    Form(form): Form<DeleteUserForm>,
) -> ApiResult<Json<StatusResponse>> {
    state.store.delete_user(&form.user_id).await?;
    Ok(StatusResponse::ok())
}

/// `type` + `token` pair used by the search and modify forms.
#[derive(Debug, Default, Deserialize)]
pub struct FieldForm {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub token: String,
}

impl FieldForm {
    /// An empty `type` means no filter.
    fn filter(self) -> ApiResult<Option<BookFilter>> {
        let filter = match self.kind.as_str() {
            "" => None,
            "name" => Some(BookFilter::Name(self.token)),
            "author" => Some(BookFilter::Author(self.token)),
            "ISBN" | "isbn" => Some(BookFilter::Isbn(self.token)),
            "keyword" => Some(BookFilter::Keyword(self.token)),
            other => return Err(ApiError::bad_request(format!("unknown search type: {other}"))),
        };
        Ok(filter)
    }

    fn field(self) -> ApiResult<BookField> {
        let field = match self.kind.as_str() {
            "" => return Err(ApiError::bad_request("choose a field to modify")),
            "name" => BookField::Name(self.token),
            "author" => BookField::Author(self.token),
            "ISBN" | "isbn" => BookField::Isbn(self.token),
            "keyword" => BookField::Keyword(self.token),
            "price" => BookField::Price(parse_field("price", &self.token)?),
            other => return Err(ApiError::bad_request(format!("unknown field: {other}"))),
        };
        Ok(field)
    }
}

#[derive(Debug, Serialize)]
pub struct BooksResponse {
    pub count: usize,
    pub books: Vec<BookRow>,
}

pub async fn list_books(
    State(state): State<AppState>,
    Query(query): Query<FieldForm>,
) -> ApiResult<Json<BooksResponse>> {
    show_books(&state, query).await
}

pub async fn search_books(
    State(state): State<AppState>,
    Form(form): Form<FieldForm>,
) -> ApiResult<Json<BooksResponse>> {
    show_books(&state, form).await
}

async fn show_books(state: &AppState, form: FieldForm) -> ApiResult<Json<BooksResponse>> {
    let books = state.store.show(form.filter()?).await?;
    Ok(Json(BooksResponse {
        count: books.len(),
        books,
    }))
}

#[derive(Debug, Deserialize)]
pub struct BuyForm {
    #[serde(rename = "ISBN")]
    pub isbn: String,
    pub quantity: String,
}

#[derive(Debug, Serialize)]
pub struct BuyResponse {
    pub isbn: String,
    pub quantity: u32,
    pub spent: f64,
}

pub async fn buy(
    State(state): State<AppState>,
    Form(form): Form<BuyForm>,
) -> ApiResult<Json<BuyResponse>> {
    let quantity = parse_field("quantity", &form.quantity)?;
    let spent = state.store.buy(&form.isbn, quantity).await?;
    Ok(Json(BuyResponse {
        isbn: form.isbn,
        quantity,
        spent,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SelectForm {
    #[serde(rename = "ISBN")]
    pub isbn: String,
}

pub async fn select(
    State(state): State<AppState>,
    Form(form): Form<SelectForm>,
) -> ApiResult<Json<StatusResponse>> {
    state.store.select(&form.isbn).await?;
    Ok(StatusResponse::ok())
}

pub async fn modify(
    State(state): State<AppState>,
    Form(form): Form<FieldForm>,
) -> ApiResult<Json<StatusResponse>> {
    state.store.modify(form.field()?).await?;
    Ok(StatusResponse::ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportForm {
    pub quantity: String,
    pub total_cost: String,
}

pub async fn import(
    State(state): State<AppState>,
    Form(form): Form<ImportForm>,
) -> ApiResult<Json<StatusResponse>> {
    let quantity = parse_field("quantity", &form.quantity)?;
    let total_cost = parse_field("totalCost", &form.total_cost)?;
    state.store.import(quantity, total_cost).await?;
    Ok(StatusResponse::ok())
}

#[derive(Debug, Default, Deserialize)]
pub struct FinanceForm {
    #[serde(default)]
    pub limit: String,
}

impl FinanceForm {
    /// An empty limit covers every transaction.
    fn limit(&self) -> ApiResult<Option<u32>> {
        if self.limit.trim().is_empty() {
            Ok(None)
        } else {
            parse_field("limit", &self.limit).map(Some)
        }
    }
}

pub async fn get_finance(
    State(state): State<AppState>,
    Query(query): Query<FinanceForm>,
) -> ApiResult<Json<FinanceSummary>> {
    Ok(Json(state.store.finance(query.limit()?).await?))
}

pub async fn post_finance(
    State(state): State<AppState>,
    Form(form): Form<FinanceForm>,
) -> ApiResult<Json<FinanceSummary>> {
    Ok(Json(state.store.finance(form.limit()?).await?))
}

fn confirm_password(password: &str, repeated: &str) -> ApiResult<()> {
    if password == repeated {
        Ok(())
    } else {
        Err(ApiError::bad_request("passwords do not match"))
    }
}

fn parse_field<T: FromStr>(name: &str, value: &str) -> ApiResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("{name} is not a valid number: {value:?}")))
}

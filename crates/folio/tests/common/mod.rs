//! Test utilities and common setup.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use folio::api::{self, AppState};
use folio::{
    BookstoreService, CommandChannel, ExchangeConfig, ExchangeCoordinator, SessionState,
    WorkerStatus,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::watch;
use tower::ServiceExt;

struct Account {
    password: String,
    privilege: u8,
}

struct Book {
    name: String,
    author: String,
    keyword: String,
    price: f64,
    quantity: u64,
}

/// Just enough of the Bookstore backend to drive the API end to end.
struct FakeBookstore {
    accounts: HashMap<String, Account>,
    /// Login stack: account id and the ISBN it selected.
    logins: Vec<(String, Option<String>)>,
    books: BTreeMap<String, Book>,
    ledger: Vec<(f64, f64)>,
}

impl FakeBookstore {
    fn new() -> Self {
        let mut accounts = HashMap::new();
        accounts.insert(
            "root".to_string(),
            Account {
                password: "sjtu".to_string(),
                privilege: 7,
            },
        );
        Self {
            accounts,
            logins: Vec::new(),
            books: BTreeMap::new(),
            ledger: Vec::new(),
        }
    }

    fn privilege(&self) -> u8 {
        self.logins
            .last()
            .and_then(|(id, _)| self.accounts.get(id))
            .map_or(0, |account| account.privilege)
    }

    fn selected(&self) -> Option<String> {
        self.logins.last().and_then(|(_, isbn)| isbn.clone())
    }

    /// Returns the reply text, or `None` when the backend should stop.
    fn handle(&mut self, line: &str) -> Option<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let reply = match tokens.as_slice() {
            ["exit"] | ["quit"] => return None,
            ["su", id, password] => match self.accounts.get(*id) {
                Some(account) if account.password == *password => {
                    let privilege = account.privilege;
                    self.logins.push((id.to_string(), None));
                    privilege.to_string()
                }
                _ => invalid(),
            },
            ["logout"] => match self.logins.pop() {
                Some(_) => success(),
                None => invalid(),
            },
            ["register", id, password, _name] => {
                if self.accounts.contains_key(*id) {
                    invalid()
                } else {
                    self.accounts.insert(
                        id.to_string(),
                        Account {
                            password: password.to_string(),
                            privilege: 1,
                        },
                    );
                    success()
                }
            }
            ["passwd", id, old, new] if self.privilege() >= 1 => match self.accounts.get_mut(*id) {
                Some(account) if account.password == *old => {
                    account.password = new.to_string();
                    success()
                }
                _ => invalid(),
            },
            ["useradd", id, password, level, _name] if self.privilege() >= 3 => {
                let level: u8 = level.parse().unwrap_or(u8::MAX);
                if level >= self.privilege() || self.accounts.contains_key(*id) {
                    invalid()
                } else {
                    self.accounts.insert(
                        id.to_string(),
                        Account {
                            password: password.to_string(),
                            privilege: level,
                        },
                    );
                    success()
                }
            }
            ["delete", id] if self.privilege() >= 7 => {
                let logged_in = self.logins.iter().any(|(who, _)| who == id);
                if logged_in || self.accounts.remove(*id).is_none() {
                    invalid()
                } else {
                    success()
                }
            }
            ["show", "finance", rest @ ..] if self.privilege() >= 7 => self.finance(rest),
            ["show", "finance", ..] => invalid(),
            ["show", rest @ ..] if self.privilege() >= 1 => self.show(rest),
            ["buy", isbn, quantity] if self.privilege() >= 1 => {
                let quantity: u64 = quantity.parse().unwrap_or(0);
                match self.books.get_mut(*isbn) {
                    Some(book) if quantity > 0 && book.quantity >= quantity => {
                        book.quantity -= quantity;
                        let spent = book.price * quantity as f64;
                        self.ledger.push((spent, 0.0));
                        format!("{spent:.2}")
                    }
                    _ => invalid(),
                }
            }
            ["select", isbn] if self.privilege() >= 3 => {
                self.books.entry(isbn.to_string()).or_insert_with(|| Book {
                    name: String::new(),
                    author: String::new(),
                    keyword: String::new(),
                    price: 0.0,
                    quantity: 0,
                });
                if let Some(top) = self.logins.last_mut() {
                    top.1 = Some(isbn.to_string());
                }
                success()
            }
            ["modify", option] if self.privilege() >= 3 => self.modify(option),
            ["import", quantity, cost] if self.privilege() >= 3 => {
                match (self.selected(), quantity.parse::<u64>(), cost.parse::<f64>()) {
                    (Some(isbn), Ok(quantity), Ok(cost)) if quantity > 0 => {
                        if let Some(book) = self.books.get_mut(&isbn) {
                            book.quantity += quantity;
                        }
                        self.ledger.push((0.0, cost));
                        success()
                    }
                    _ => invalid(),
                }
            }
            _ => invalid(),
        };
        Some(reply)
    }

    fn show(&self, filter: &[&str]) -> String {
        let matches = |isbn: &str, book: &Book| match filter {
            [] => true,
            [option] => match parse_option(option) {
                Some(("ISBN", value)) => isbn == value,
                Some(("name", value)) => book.name == value,
                Some(("author", value)) => book.author == value,
                Some(("keyword", value)) => book.keyword.split('|').any(|k| k == value),
                _ => false,
            },
            _ => false,
        };

        let rows: Vec<String> = self
            .books
            .iter()
            .filter(|(isbn, book)| matches(isbn.as_str(), *book))
            .map(|(isbn, book)| {
                format!(
                    "{isbn}\t{}\t{}\t{}\t{:.2}\t{}",
                    book.name, book.author, book.keyword, book.price, book.quantity
                )
            })
            .collect();

        let mut reply = rows.len().to_string();
        for row in rows {
            reply.push('\n');
            reply.push_str(&row);
        }
        reply
    }

    fn finance(&self, limit: &[&str]) -> String {
        let entries = match limit {
            [] => &self.ledger[..],
            [n] => match n.parse::<usize>() {
                Ok(n) if n <= self.ledger.len() => &self.ledger[self.ledger.len() - n..],
                _ => return invalid(),
            },
            _ => return invalid(),
        };
        let income: f64 = entries.iter().map(|(i, _)| i).sum();
        let expenditure: f64 = entries.iter().map(|(_, e)| e).sum();
        format!("+ {income:.2} - {expenditure:.2}")
    }

    fn modify(&mut self, option: &str) -> String {
        let Some(selected) = self.selected() else {
            return invalid();
        };
        let Some((field, value)) = parse_option(option) else {
            return invalid();
        };

        if field == "ISBN" {
            if self.books.contains_key(value) {
                return invalid();
            }
            let Some(book) = self.books.remove(&selected) else {
                return invalid();
            };
            self.books.insert(value.to_string(), book);
            for login in &mut self.logins {
                if login.1.as_deref() == Some(selected.as_str()) {
                    login.1 = Some(value.to_string());
                }
            }
            return success();
        }

        let Some(book) = self.books.get_mut(&selected) else {
            return invalid();
        };
        match field {
            "name" => book.name = value.to_string(),
            "author" => book.author = value.to_string(),
            "keyword" => book.keyword = value.to_string(),
            "price" => match value.parse() {
                Ok(price) => book.price = price,
                Err(_) => return invalid(),
            },
            _ => return invalid(),
        }
        success()
    }
}

/// Splits `-name="value"` or `-ISBN=value` into its parts.
fn parse_option(option: &str) -> Option<(&str, &str)> {
    let (name, value) = option.strip_prefix('-')?.split_once('=')?;
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Some((name, value))
}

fn invalid() -> String {
    "Invalid".to_string()
}

fn success() -> String {
    "Success".to_string()
}

/// Runs the fake backend on its end of the pipe until `exit` or EOF.
fn spawn_fake_bookstore(stream: DuplexStream) {
    tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();
        let mut store = FakeBookstore::new();

        while let Ok(Some(line)) = lines.next_line().await {
            let Some(reply) = store.handle(&line) else {
                break;
            };
            let framed = format!("{reply}\n");
            if write.write_all(framed.as_bytes()).await.is_err() {
                break;
            }
        }
    });
}

/// Create a test application backed by a fresh fake bookstore.
pub async fn test_app() -> Router {
    test_app_with_status().await.0
}

/// Like [`test_app`], also returning the sender that drives `/health`.
pub async fn test_app_with_status() -> (Router, watch::Sender<WorkerStatus>) {
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let (our_read, our_write) = tokio::io::split(ours);
    spawn_fake_bookstore(theirs);

    let (coordinator, _reader) = ExchangeCoordinator::connect(
        our_read,
        our_write,
        ExchangeConfig {
            reply_timeout: Duration::from_secs(2),
            resync_grace: Duration::from_millis(20),
        },
    );
    let channel: Arc<dyn CommandChannel> = Arc::new(coordinator);
    let session = Arc::new(SessionState::new(Arc::clone(&channel)));
    let store = BookstoreService::new(channel, session);

    let (status_tx, status_rx) = watch::channel(WorkerStatus::Running { pid: None });
    let state = AppState::new(store, status_rx, Vec::new());
    (api::create_router(state), status_tx)
}

/// POSTs a form body and returns the status and parsed JSON.
pub async fn post_form(app: &Router, uri: &str, form: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri(uri)
        .method(Method::POST)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap();
    send(app, request).await
}

/// GETs `uri` and returns the status and parsed JSON.
pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri(uri)
        .method(Method::GET)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

/// Logs in and asserts success.
pub async fn login(app: &Router, id: &str, password: &str) -> Value {
    let (status, json) = post_form(app, "/login", &format!("ID={id}&password={password}")).await;
    assert_eq!(status, StatusCode::OK, "login as {id} failed: {json}");
    json
}

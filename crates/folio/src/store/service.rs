//! Typed bookstore operations on top of the shared channel.

use std::sync::Arc;

use folio_protocol::{
    BookField, BookFilter, BookRow, Command, FinanceSummary, Privilege, Reply, ReplyError,
    SUCCESS_TOKEN, parse_amount,
};
use tracing::{debug, info};

use super::error::StoreError;
use crate::mux::{CommandChannel, ExchangeError};
use crate::session::{SessionSnapshot, SessionState};

/// Every bookstore operation, gated by the session's privilege.
#[derive(Clone)]
pub struct BookstoreService {
    channel: Arc<dyn CommandChannel>,
    session: Arc<SessionState>,
}

impl BookstoreService {
    pub fn new(channel: Arc<dyn CommandChannel>, session: Arc<SessionState>) -> Self {
        Self { channel, session }
    }

    pub fn session(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub async fn login(&self, id: &str, password: &str) -> Result<SessionSnapshot, StoreError> {
        self.session.authenticate(id, password).await
    }

    pub async fn logout(&self) -> Result<SessionSnapshot, StoreError> {
        self.session.logout().await
    }

    pub async fn register(&self, id: &str, password: &str, name: &str) -> Result<(), StoreError> {
        let command = Command::Register {
            id: id.to_string(),
            password: password.to_string(),
            name: name.to_string(),
        };
        self.run_for_ack(Privilege::Guest, command).await
    }

    /// Changes the logged-in account's password.
    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), StoreError> {
        let snapshot = self.session.require_privilege(Privilege::Customer)?;
        let id = snapshot.identity.unwrap_or_default();
        let command = Command::ChangePassword {
            id,
            old_password: old_password.to_string(),
            new_password: new_password.to_string(),
        };
        self.run_for_ack(Privilege::Customer, command).await
    }

    pub async fn add_user(
        &self,
        id: &str,
        password: &str,
        privilege: Privilege,
        name: &str,
    ) -> Result<(), StoreError> {
        let command = Command::AddUser {
            id: id.to_string(),
            password: password.to_string(),
            privilege,
            name: name.to_string(),
        };
        self.run_for_ack(Privilege::Staff, command).await
    }

    pub async fn delete_user(&self, id: &str) -> Result<(), StoreError> {
        let command = Command::DeleteUser { id: id.to_string() };
        self.run_for_ack(Privilege::Admin, command).await
    }

    /// Lists books, optionally filtered.
    pub async fn show(&self, filter: Option<BookFilter>) -> Result<Vec<BookRow>, StoreError> {
        let command = Command::Show(filter);
        let verb = command.verb();
        match self.run(Privilege::Customer, command).await? {
            Reply::Rows(rows) => rows
                .iter()
                .map(|fields| BookRow::from_fields(fields).map_err(|e| malformed(verb, e)))
                .collect(),
            other => Err(ExchangeError::protocol(verb, format!("expected rows, got {other:?}")).into()),
        }
    }

    /// Buys `quantity` copies and returns the amount charged.
    pub async fn buy(&self, isbn: &str, quantity: u32) -> Result<f64, StoreError> {
        let command = Command::Buy {
            isbn: isbn.to_string(),
            quantity,
        };
        let verb = command.verb();
        let line = self.run_for_line(Privilege::Customer, command).await?;
        let spent = parse_amount(&line).map_err(|e| malformed(verb, e))?;
        info!(quantity, spent, "purchase completed");
        Ok(spent)
    }

    pub async fn select(&self, isbn: &str) -> Result<(), StoreError> {
        let command = Command::Select {
            isbn: isbn.to_string(),
        };
        self.run_for_ack(Privilege::Staff, command).await
    }

    /// Changes one attribute of the selected book.
    pub async fn modify(&self, field: BookField) -> Result<(), StoreError> {
        self.run_for_ack(Privilege::Staff, Command::Modify(field)).await
    }

    pub async fn import(&self, quantity: u32, total_cost: f64) -> Result<(), StoreError> {
        let command = Command::Import {
            quantity,
            total_cost,
        };
        self.run_for_ack(Privilege::Staff, command).await
    }

    /// Income and expenditure, over the last `limit` transactions if given.
    pub async fn finance(&self, limit: Option<u32>) -> Result<FinanceSummary, StoreError> {
        let command = Command::ShowFinance { limit };
        let verb = command.verb();
        let line = self.run_for_line(Privilege::Admin, command).await?;
        FinanceSummary::parse(&line).map_err(|e| malformed(verb, e))
    }

    async fn run(&self, min: Privilege, command: Command) -> Result<Reply, StoreError> {
        self.session.require_privilege(min)?;
        let line = command.to_line()?;
        let verb = command.verb();

        let reply = self.channel.exchange(&line, command.reply_shape()).await?;
        if reply.is_rejected() {
            debug!(command = verb, "rejected by bookstore");
            return Err(StoreError::Rejected { verb });
        }
        Ok(reply)
    }

    async fn run_for_line(&self, min: Privilege, command: Command) -> Result<String, StoreError> {
        let verb = command.verb();
        match self.run(min, command).await? {
            Reply::Line(line) => Ok(line),
            other => Err(ExchangeError::protocol(verb, format!("expected one line, got {other:?}")).into()),
        }
    }

    async fn run_for_ack(&self, min: Privilege, command: Command) -> Result<(), StoreError> {
        let verb = command.verb();
        let line = self.run_for_line(min, command).await?;
        if line != SUCCESS_TOKEN {
            debug!(command = verb, reply = %line, "non-standard acknowledgement");
        }
        Ok(())
    }
}

fn malformed(verb: &str, err: ReplyError) -> StoreError {
    ExchangeError::protocol(verb, err.to_string()).into()
}

impl std::fmt::Debug for BookstoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookstoreService")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedChannel;
    use folio_protocol::ReplyShape;

    fn service(channel: ScriptedChannel) -> (BookstoreService, Arc<ScriptedChannel>) {
        let channel = Arc::new(channel);
        let session = Arc::new(SessionState::new(channel.clone()));
        (BookstoreService::new(channel.clone(), session), channel)
    }

    #[tokio::test]
    async fn test_guest_cannot_list_books() {
        let (store, channel) = service(ScriptedChannel::new());

        let err = store.show(None).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Forbidden {
                required: Privilege::Customer,
                current: Privilege::Guest
            }
        ));
        assert!(channel.commands().is_empty());
    }

    #[tokio::test]
    async fn test_guest_can_register() {
        let (store, channel) = service(ScriptedChannel::new().line("Success"));

        store.register("bob", "pw", "Bob").await.unwrap();
        assert_eq!(channel.commands(), vec!["register bob pw Bob"]);
    }

    #[tokio::test]
    async fn test_show_parses_rows() {
        let (store, channel) = service(
            ScriptedChannel::new().line("1").rows(&[
                &["978-7-111", "SICP", "Abelson", "lisp|cs", "59.00", "4"],
                &["978-0-262", "HtDP", "Felleisen", "racket", "45.50", "0"],
            ]),
        );
        store.login("alice", "secret123").await.unwrap();

        let books = store
            .show(Some(BookFilter::Author("Abelson".to_string())))
            .await
            .unwrap();
        assert_eq!(books.len(), 2);
        assert_eq!(books[0].isbn, "978-7-111");
        assert_eq!(books[0].price, 59.0);
        assert_eq!(books[1].quantity, 0);

        assert_eq!(channel.commands()[1], "show -author=\"Abelson\"");
        assert_eq!(channel.shapes()[1], ReplyShape::CountPrefixed { fields: 6 });
    }

    #[tokio::test]
    async fn test_show_with_bad_price_is_protocol_error() {
        let (store, _) = service(
            ScriptedChannel::new()
                .line("1")
                .rows(&[&["978", "Dune", "Herbert", "sf", "cheap", "3"]]),
        );
        store.login("alice", "secret123").await.unwrap();

        let err = store.show(None).await.unwrap_err();
        assert!(matches!(err, StoreError::Exchange(ExchangeError::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_buy_returns_amount_spent() {
        let (store, channel) = service(ScriptedChannel::new().line("1").line("19.98"));
        store.login("alice", "secret123").await.unwrap();

        let spent = store.buy("978", 2).await.unwrap();
        assert_eq!(spent, 19.98);
        assert_eq!(channel.commands()[1], "buy 978 2");
    }

    #[tokio::test]
    async fn test_invalid_reply_is_rejection() {
        let (store, _) = service(ScriptedChannel::new().line("1").line("Invalid"));
        store.login("alice", "secret123").await.unwrap();

        let err = store.buy("978", 1000).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected { verb: "buy" }));
    }

    #[tokio::test]
    async fn test_change_password_uses_current_identity() {
        let (store, channel) = service(ScriptedChannel::new().line("1").line("Success"));
        store.login("alice", "secret123").await.unwrap();

        store.change_password("secret123", "hunter2").await.unwrap();
        assert_eq!(channel.commands()[1], "passwd alice secret123 hunter2");
    }

    #[tokio::test]
    async fn test_staff_operations() {
        let (store, channel) = service(
            ScriptedChannel::new()
                .line("3")
                .line("Success")
                .line("Success")
                .line("Success")
                .line("Success"),
        );
        store.login("clerk", "pw").await.unwrap();

        store.select("978").await.unwrap();
        store.modify(BookField::Price(12.5)).await.unwrap();
        store.import(10, 80.0).await.unwrap();
        store.add_user("carol", "pw", Privilege::Customer, "Carol").await.unwrap();

        assert_eq!(
            channel.commands()[1..],
            [
                "select 978",
                "modify -price=12.50",
                "import 10 80.00",
                "useradd carol pw 1 Carol",
            ]
        );
    }

    #[tokio::test]
    async fn test_staff_cannot_delete_users_or_read_finance() {
        let (store, _) = service(ScriptedChannel::new().line("3"));
        store.login("clerk", "pw").await.unwrap();

        assert!(matches!(
            store.delete_user("carol").await,
            Err(StoreError::Forbidden { required: Privilege::Admin, .. })
        ));
        assert!(matches!(
            store.finance(None).await,
            Err(StoreError::Forbidden { required: Privilege::Admin, .. })
        ));
    }

    #[tokio::test]
    async fn test_finance_accepts_both_renderings() {
        let (store, channel) = service(
            ScriptedChannel::new()
                .line("7")
                .line("120.00\t80.00")
                .line("+ 19.98 - 0.00"),
        );
        store.login("root", "sjtu").await.unwrap();

        let all = store.finance(None).await.unwrap();
        assert_eq!(all.income, 120.0);
        assert_eq!(all.expenditure, 80.0);

        let last = store.finance(Some(1)).await.unwrap();
        assert_eq!(last.income, 19.98);
        assert_eq!(last.expenditure, 0.0);

        assert_eq!(channel.commands()[1..], ["show finance", "show finance 1"]);
    }

    #[tokio::test]
    async fn test_grammar_breaking_argument_is_not_sent() {
        let (store, channel) = service(ScriptedChannel::new().line("3"));
        store.login("clerk", "pw").await.unwrap();

        let err = store
            .modify(BookField::Name("say \"hi\"".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        assert_eq!(channel.commands().len(), 1);
    }
}

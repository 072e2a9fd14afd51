use aggregator_client::{Client, Session};
use axum::async_trait;
use chrono::NaiveDate;

use super::{Account, Item, Login, Result, Transaction, Upstream};

#[async_trait]
impl Login for Client {
    type Session = Session;

    async fn login(&self) -> Result<Session> {
        self.authenticate().await
    }
}

#[async_trait]
impl Upstream for Session {
    async fn item(&self, item_id: &str) -> Result<Item> {
        Session::item(self, item_id).await
    }

    async fn accounts(&self, item_id: &str) -> Result<Vec<Account>> {
        Session::accounts(self, item_id).await
    }

    async fn transactions(
        &self,
        account_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        Session::transactions(self, account_id, from, to).await
    }

    async fn delete_item(&self, item_id: &str) -> Result<()> {
        Session::delete_item(self, item_id).await
    }
}

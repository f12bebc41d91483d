//! Postgres `LISTEN`/`NOTIFY` source for the notification bridge.

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::postgres::{PgListener, PgPool};

use super::bridge::{ChangeListener, ListenerError, RawEvent, RawEventStream};
use super::DEFAULT_CHANNEL;

const NOTIFY_TRIGGER_SQL: &str = include_str!("../../sql/consumo_notify.sql");

/// Listens on a Postgres channel using a dedicated connection from `pool`.
#[derive(Clone)]
pub struct PgChangeListener {
    pool: PgPool,
}

impl PgChangeListener {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChangeListener for PgChangeListener {
    async fn subscribe(&self, channel: &str) -> Result<RawEventStream, ListenerError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| ListenerError::Connect(e.to_string()))?;

        listener
            .listen(channel)
            .await
            .map_err(|e| ListenerError::Subscribe {
                channel: channel.to_string(),
                message: e.to_string(),
            })?;

        let stream = listener.into_stream().map(|notification| {
            notification
                .map(|n| RawEvent {
                    channel: n.channel().to_string(),
                    payload: Some(n.payload())
                        .filter(|p| !p.is_empty())
                        .map(str::to_string),
                })
                .map_err(|e| ListenerError::Stream(e.to_string()))
        });

        Ok(Box::pin(stream))
    }
}

/// Creates (or replaces) the trigger that notifies `channel` on every
/// insert or update of the `consumo` table.
pub async fn install_notify_trigger(pool: &PgPool, channel: &str) -> Result<(), sqlx::Error> {
    let sql = notify_trigger_sql(channel);
    sqlx::raw_sql(&sql).execute(pool).await?;
    tracing::info!(channel, "Installed consumption notify trigger");
    Ok(())
}

fn notify_trigger_sql(channel: &str) -> String {
    NOTIFY_TRIGGER_SQL.replace(
        &format!("'{DEFAULT_CHANNEL}'"),
        &format!("'{}'", channel.replace('\'', "''")),
    )
}

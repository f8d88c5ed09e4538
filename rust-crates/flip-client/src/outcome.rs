use crate::{
    accounts::{
        AccountBalance,
        AccountReader,
        Asset,
    },
    endpoint::Endpoint,
    error::{
        FlipError,
        Result,
    },
    program::{
        FlipProgram,
        FlipResultEvent,
        expected_payout,
    },
    rpc::{
        self,
        RpcTransport,
    },
    wager::{
        TransactionId,
        describe_tx_error,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use rust_decimal::{
    Decimal,
    prelude::ToPrimitive,
};
use serde::Deserialize;
use serde_json::{
    Value,
    json,
};
use solana_sdk::pubkey::Pubkey;
use std::time::Duration;
use tracing::{
    info,
    warn,
};

const WIN_MARKERS: [&str; 3] = ["player wins", "you won", "won: true"];
const TRANSFER_MARKER: &str = "Instruction: Transfer";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InferenceMethod {
    LogHeuristic,
    BalanceDelta,
}

/// How much to trust a [`WagerOutcome`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Resolution {
    /// Decoded from the program's own result event.
    Confirmed,
    Inferred(InferenceMethod),
}

impl Resolution {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Resolution::Confirmed)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WagerOutcome {
    pub tx_id: TransactionId,
    /// Base units.
    pub wager: u64,
    pub won: bool,
    /// Base units, zero when lost.
    pub payout: u64,
    pub resolution: Resolution,
    pub resolved_at: DateTime<Utc>,
}

impl WagerOutcome {
    /// Change to the player's holdings this outcome implies.
    pub fn balance_delta(&self) -> i128 {
        i128::from(self.payout) - i128::from(self.wager)
    }
}

/// Win flag and payout produced by one tier of the cascade.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Verdict {
    pub won: bool,
    pub payout: u64,
}

impl Verdict {
    fn lost() -> Self {
        Self {
            won: false,
            payout: 0,
        }
    }
}

/// First `FlipResult` event in the logs that names `player`.
pub fn verdict_from_event(logs: &[String], player: &Pubkey) -> Option<Verdict> {
    logs.iter()
        .filter_map(|line| FlipResultEvent::from_log_line(line))
        .find(|event| &event.player == player)
        .map(|event| Verdict {
            won: event.won,
            payout: if event.won { event.payout } else { 0 },
        })
}

/// Reads win or loss from plain log text. A win shows either an explicit
/// marker or a second token transfer (the payout). A single transfer in a
/// successful invocation of the program is a loss.
pub fn verdict_from_logs(logs: &[String], program_id: &Pubkey, wager: u64) -> Option<Verdict> {
    let win_marker = logs.iter().any(|line| {
        let lower = line.to_lowercase();
        WIN_MARKERS.iter().any(|marker| lower.contains(marker))
    });
    let transfers = logs
        .iter()
        .filter(|line| line.contains(TRANSFER_MARKER))
        .count();
    if win_marker || transfers > 1 {
        return Some(Verdict {
            won: true,
            payout: expected_payout(wager),
        });
    }
    let success = format!("Program {program_id} success");
    if transfers == 1 && logs.iter().any(|line| line.trim() == success) {
        return Some(Verdict::lost());
    }
    None
}

/// Compares a settled balance with what it would be had the wager been lost.
/// An unchanged balance carries no information yet.
pub fn verdict_from_balance_delta(
    pre_balance: u64,
    wager: u64,
    observed: u64,
    tolerance_fraction: Decimal,
) -> Option<Verdict> {
    if observed == pre_balance {
        return None;
    }
    let expected_if_lost = pre_balance.saturating_sub(wager);
    let tolerance = (Decimal::from(wager) * tolerance_fraction)
        .floor()
        .to_u64()
        .unwrap_or(u64::MAX);
    if observed > expected_if_lost.saturating_add(tolerance) {
        Some(Verdict {
            won: true,
            payout: observed - expected_if_lost,
        })
    } else {
        Some(Verdict::lost())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ResolverSettings {
    pub settle_delay: Duration,
    pub tolerance_fraction: Decimal,
    pub record_attempts: u32,
    pub record_poll_interval: Duration,
}

/// Runs the three-tier cascade for one submitted wager. Never guesses: when
/// no tier produces data the result is [`FlipError::OutcomeIndeterminate`].
pub struct OutcomeResolver<'a, T> {
    transport: &'a T,
    program: &'a FlipProgram,
    settings: ResolverSettings,
}

impl<'a, T: RpcTransport> OutcomeResolver<'a, T> {
    pub fn new(transport: &'a T, program: &'a FlipProgram, settings: ResolverSettings) -> Self {
        Self {
            transport,
            program,
            settings,
        }
    }

    pub async fn resolve_outcome(
        &self,
        endpoint: &Endpoint,
        tx_id: &TransactionId,
        pre_balance: &AccountBalance,
        wager: u64,
    ) -> Result<WagerOutcome> {
        let player = pre_balance.owner;
        let logs = self.fetch_logs(endpoint, tx_id).await?;

        if let Some(logs) = &logs {
            if let Some(verdict) = verdict_from_event(logs, &player) {
                info!(
                    %tx_id,
                    won = verdict.won,
                    payout = verdict.payout,
                    "outcome from result event"
                );
                return Ok(self.outcome(tx_id, wager, verdict, Resolution::Confirmed));
            }
            if let Some(verdict) = verdict_from_logs(logs, &self.program.program_id, wager) {
                warn!(%tx_id, won = verdict.won, "no result event, outcome inferred from logs");
                return Ok(self.outcome(
                    tx_id,
                    wager,
                    verdict,
                    Resolution::Inferred(InferenceMethod::LogHeuristic),
                ));
            }
        }

        warn!(%tx_id, "transaction record inconclusive, falling back to balance delta");
        tokio::time::sleep(self.settings.settle_delay).await;
        let asset = Asset {
            mint: pre_balance.mint,
            decimals: pre_balance.decimals,
        };
        let observed = match AccountReader::new(self.transport)
            .get_balance(endpoint, &player, &asset)
            .await
        {
            Ok(balance) => balance.amount,
            Err(err) => {
                warn!(%tx_id, ?err, "settled balance read failed");
                return Err(FlipError::OutcomeIndeterminate {
                    tx_id: tx_id.to_string(),
                });
            }
        };
        match verdict_from_balance_delta(
            pre_balance.amount,
            wager,
            observed,
            self.settings.tolerance_fraction,
        ) {
            Some(verdict) => {
                info!(
                    %tx_id,
                    pre = pre_balance.amount,
                    observed,
                    won = verdict.won,
                    "outcome inferred from balance delta"
                );
                Ok(self.outcome(
                    tx_id,
                    wager,
                    verdict,
                    Resolution::Inferred(InferenceMethod::BalanceDelta),
                ))
            }
            None => {
                warn!(%tx_id, observed, "balance unchanged after settle delay");
                Err(FlipError::OutcomeIndeterminate {
                    tx_id: tx_id.to_string(),
                })
            }
        }
    }

    /// Log lines of the finalized record, or `None` when the record never
    /// became available or could not be read.
    async fn fetch_logs(
        &self,
        endpoint: &Endpoint,
        tx_id: &TransactionId,
    ) -> Result<Option<Vec<String>>> {
        let params = json!([
            tx_id.as_str(),
            {
                "encoding": "json",
                "commitment": "confirmed",
                "maxSupportedTransactionVersion": 0,
            },
        ]);
        let attempts = self.settings.record_attempts.max(1);
        for attempt in 1..=attempts {
            match self
                .transport
                .call(endpoint.url(), "getTransaction", params.clone())
                .await
            {
                Ok(Value::Null) => {}
                Ok(value) => {
                    let record: TransactionRecordDto =
                        match rpc::decode(value, "transaction record") {
                            Ok(record) => record,
                            Err(err) => {
                                warn!(%tx_id, ?err, "transaction record unreadable");
                                return Ok(None);
                            }
                        };
                    let Some(meta) = record.meta else {
                        return Ok(None);
                    };
                    if let Some(err) = meta.err.filter(|e| !e.is_null()) {
                        return Err(FlipError::SubmissionRejected(describe_tx_error(&err)));
                    }
                    return Ok(Some(meta.log_messages.unwrap_or_default()));
                }
                Err(err) => {
                    warn!(%tx_id, attempt, ?err, "transaction record lookup failed");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.record_poll_interval).await;
            }
        }
        Ok(None)
    }

    fn outcome(
        &self,
        tx_id: &TransactionId,
        wager: u64,
        verdict: Verdict,
        resolution: Resolution,
    ) -> WagerOutcome {
        WagerOutcome {
            tx_id: tx_id.clone(),
            wager,
            won: verdict.won,
            payout: verdict.payout,
            resolution,
            resolved_at: Utc::now(),
        }
    }
}

#[derive(Deserialize)]
struct TransactionRecordDto {
    #[serde(default)]
    meta: Option<TransactionMetaDto>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionMetaDto {
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    log_messages: Option<Vec<String>>,
}

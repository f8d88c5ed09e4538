use crate::{
    accounts::{
        AccountBalance,
        Asset,
        read_failure,
    },
    endpoint::Endpoint,
    error::{
        FlipError,
        Result,
    },
    program::{
        FlipProgram,
        rejection_message,
    },
    rpc::{
        self,
        PREFLIGHT_FAILURE_CODE,
        RpcError,
        RpcTransport,
    },
};
use base64::{
    Engine,
    engine::general_purpose::STANDARD as BASE64,
};
use rust_decimal::{
    Decimal,
    RoundingStrategy,
    prelude::ToPrimitive,
};
use serde::Deserialize;
use serde_json::{
    Value,
    json,
};
use solana_sdk::{
    hash::Hash,
    message::Message,
    pubkey::Pubkey,
    signer::Signer,
    transaction::Transaction,
};
use std::{
    fmt,
    str::FromStr,
    time::Duration,
};
use tracing::{
    info,
    warn,
};

/// Opaque handle to a submitted wager: the base58 transaction signature.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated wager. Only [`WagerRequest::new`] builds one, so holding a
/// request means the amount was positive and covered by the balance read
/// just before. Base units follow the precision the chain reported for that
/// balance, which wins over the configured one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WagerRequest {
    player: Pubkey,
    player_token_account: Pubkey,
    asset: Asset,
    amount: Decimal,
    amount_units: u64,
}

impl WagerRequest {
    pub fn new(
        player: Pubkey,
        asset: Asset,
        amount: Decimal,
        balance: &AccountBalance,
    ) -> Result<Self> {
        if amount <= Decimal::ZERO {
            return Err(FlipError::InvalidWager(amount.to_string()));
        }
        let asset = Asset {
            mint: asset.mint,
            decimals: balance.decimals,
        };
        let amount_units = to_base_units(amount, asset.decimals)?;
        let Some(player_token_account) = balance.token_account else {
            return Err(FlipError::MissingTokenAccount {
                owner: player.to_string(),
                mint: asset.mint.to_string(),
            });
        };
        if amount_units > balance.amount {
            return Err(FlipError::InsufficientBalance {
                wager: amount,
                balance: balance.ui_amount(),
            });
        }
        Ok(Self {
            player,
            player_token_account,
            asset,
            amount,
            amount_units,
        })
    }

    pub fn player(&self) -> Pubkey {
        self.player
    }

    pub fn player_token_account(&self) -> Pubkey {
        self.player_token_account
    }

    pub fn asset(&self) -> &Asset {
        &self.asset
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn amount_units(&self) -> u64 {
        self.amount_units
    }
}

/// `round(amount * 10^decimals)`, half away from zero.
pub fn to_base_units(amount: Decimal, decimals: u8) -> Result<u64> {
    let scale = 10u64
        .checked_pow(u32::from(decimals))
        .map(Decimal::from)
        .ok_or_else(|| FlipError::InvalidWager(format!("unsupported precision {decimals}")))?;
    let units = amount
        .checked_mul(scale)
        .map(|v| v.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|v| v.to_u64())
        .ok_or_else(|| FlipError::InvalidWager(amount.to_string()))?;
    if units == 0 {
        return Err(FlipError::InvalidWager(format!(
            "{amount} is below the smallest unit"
        )));
    }
    Ok(units)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Confirmation {
    Confirmed,
    /// Nothing definitive within the polling budget. The wager may still land.
    Pending,
}

pub struct WagerSubmitter<'a, T> {
    transport: &'a T,
    program: &'a FlipProgram,
}

impl<'a, T: RpcTransport> WagerSubmitter<'a, T> {
    pub fn new(transport: &'a T, program: &'a FlipProgram) -> Self {
        Self { transport, program }
    }

    /// Fetches a blockhash, signs the flip and sends it. A failure before the
    /// send is a [`FlipError::TransientReadFailure`] and nothing reached the
    /// cluster.
    pub async fn submit_wager(
        &self,
        endpoint: &Endpoint,
        request: &WagerRequest,
        signer: &dyn Signer,
    ) -> Result<TransactionId> {
        if signer.pubkey() != request.player() {
            return Err(FlipError::Wallet(format!(
                "signer {} does not own the wager of {}",
                signer.pubkey(),
                request.player()
            )));
        }
        let blockhash = self.latest_blockhash(endpoint).await?;
        let instruction = self.program.flip_instruction(
            request.player(),
            request.player_token_account(),
            request.amount_units(),
        );
        let mut tx = Transaction::new_unsigned(Message::new(
            &[instruction],
            Some(&request.player()),
        ));
        let signers: [&dyn Signer; 1] = [signer];
        tx.try_sign(&signers[..], blockhash)
            .map_err(|e| FlipError::Wallet(format!("failed to sign wager: {e}")))?;
        let wire = bincode::serialize(&tx).map_err(|e| FlipError::Encode {
            what: "transaction",
            reason: e.to_string(),
        })?;

        let params = json!([
            BASE64.encode(wire),
            { "encoding": "base64", "preflightCommitment": "confirmed" },
        ]);
        let value = self
            .transport
            .call(endpoint.url(), "sendTransaction", params)
            .await
            .map_err(|err| submission_error(endpoint, err))?;
        let signature: String = rpc::decode(value, "transaction signature")?;
        info!(
            tx_id = %signature,
            wager = request.amount_units(),
            endpoint = %endpoint,
            "wager submitted"
        );
        Ok(TransactionId::new(signature))
    }

    /// Polls the signature status until the cluster confirms it, reports a
    /// program error, or the attempt budget runs out. Transport failures and
    /// unreadable responses are logged and the poll continues.
    pub async fn await_confirmation(
        &self,
        endpoint: &Endpoint,
        tx_id: &TransactionId,
        poll_interval: Duration,
        attempts: u32,
    ) -> Result<Confirmation> {
        let params = json!([[tx_id.as_str()], { "searchTransactionHistory": true }]);
        for attempt in 1..=attempts {
            let polled = match self
                .transport
                .call(endpoint.url(), "getSignatureStatuses", params.clone())
                .await
            {
                Ok(value) => rpc::decode::<SignatureStatusesDto>(value, "signature statuses"),
                Err(err) => Err(read_failure(endpoint, err)),
            };
            match polled {
                Ok(statuses) => {
                    if let Some(status) = statuses.value.into_iter().flatten().next() {
                        if let Some(err) = status.err.filter(|e| !e.is_null()) {
                            return Err(FlipError::SubmissionRejected(describe_tx_error(
                                &err,
                            )));
                        }
                        if matches!(
                            status.confirmation_status.as_deref(),
                            Some("confirmed") | Some("finalized")
                        ) {
                            info!(%tx_id, attempt, "wager confirmed");
                            return Ok(Confirmation::Confirmed);
                        }
                    }
                }
                Err(err) => {
                    warn!(%tx_id, attempt, ?err, "signature status poll failed");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(poll_interval).await;
            }
        }
        warn!(%tx_id, attempts, "wager not confirmed within polling budget");
        Ok(Confirmation::Pending)
    }

    async fn latest_blockhash(&self, endpoint: &Endpoint) -> Result<Hash> {
        let value = self
            .transport
            .call(
                endpoint.url(),
                "getLatestBlockhash",
                json!([{ "commitment": "confirmed" }]),
            )
            .await
            .map_err(|e| read_failure(endpoint, e))?;
        let response: LatestBlockhashDto = rpc::decode(value, "latest blockhash")?;
        Hash::from_str(&response.value.blockhash).map_err(|e| FlipError::decode("blockhash", e))
    }
}

fn submission_error(endpoint: &Endpoint, err: RpcError) -> FlipError {
    match err {
        RpcError::Rpc {
            code,
            message,
            data,
        } => {
            let detail = data
                .as_ref()
                .and_then(|d| d.get("err"))
                .filter(|e| !e.is_null())
                .map(describe_tx_error);
            let reason = match (code, detail) {
                (PREFLIGHT_FAILURE_CODE, Some(detail)) => detail,
                _ => message,
            };
            warn!(%endpoint, code, %reason, "wager rejected");
            FlipError::SubmissionRejected(reason)
        }
        other => FlipError::SubmissionTransportError {
            endpoint: endpoint.url().to_string(),
            reason: other.to_string(),
        },
    }
}

/// Turns a transaction error object such as
/// `{"InstructionError":[0,{"Custom":6001}]}` into the program's message.
pub(crate) fn describe_tx_error(err: &Value) -> String {
    let custom = err
        .get("InstructionError")
        .and_then(|ie| ie.get(1))
        .and_then(|detail| detail.get("Custom"))
        .and_then(Value::as_u64)
        .and_then(|code| u32::try_from(code).ok());
    match custom.and_then(|code| rejection_message(code).map(|msg| (code, msg))) {
        Some((code, msg)) => format!("{msg} (error {code})"),
        None => err.to_string(),
    }
}

#[derive(Deserialize)]
struct LatestBlockhashDto {
    value: BlockhashDto,
}

#[derive(Deserialize)]
struct BlockhashDto {
    blockhash: String,
}

#[derive(Deserialize)]
struct SignatureStatusesDto {
    value: Vec<Option<SignatureStatusDto>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatusDto {
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    confirmation_status: Option<String>,
}

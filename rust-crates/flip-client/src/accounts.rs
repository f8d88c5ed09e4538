use crate::{
    endpoint::Endpoint,
    error::{
        FlipError,
        Result,
    },
    program::GameState,
    rpc::{
        self,
        RpcError,
        RpcTransport,
    },
};
use base64::{
    Engine,
    engine::general_purpose::STANDARD as BASE64,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

/// A fungible token identified by its mint.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Asset {
    pub mint: Pubkey,
    pub decimals: u8,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccountBalance {
    pub owner: Pubkey,
    pub mint: Pubkey,
    /// Base units.
    pub amount: u64,
    pub decimals: u8,
    /// `None` when the owner holds no account for this mint.
    pub token_account: Option<Pubkey>,
}

impl AccountBalance {
    pub fn zero(owner: Pubkey, asset: &Asset) -> Self {
        Self {
            owner,
            mint: asset.mint,
            amount: 0,
            decimals: asset.decimals,
            token_account: None,
        }
    }

    pub fn ui_amount(&self) -> Decimal {
        to_ui_amount(self.amount, self.decimals)
    }
}

pub fn to_ui_amount(amount: u64, decimals: u8) -> Decimal {
    let mut value = Decimal::from(amount);
    // Decimal carries at most 28 fractional digits.
    value
        .set_scale(u32::from(decimals).min(28))
        .map(|_| value.normalize())
        .unwrap_or(value)
}

/// Reads holdings and program accounts through one endpoint per call. Never
/// retries; the session decides what to do with a transient failure.
pub struct AccountReader<'a, T> {
    transport: &'a T,
}

impl<'a, T: RpcTransport> AccountReader<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self { transport }
    }

    pub async fn get_balance(
        &self,
        endpoint: &Endpoint,
        owner: &Pubkey,
        asset: &Asset,
    ) -> Result<AccountBalance> {
        let params = json!([
            owner.to_string(),
            { "mint": asset.mint.to_string() },
            { "encoding": "jsonParsed", "commitment": "confirmed" },
        ]);
        let value = self
            .transport
            .call(endpoint.url(), "getTokenAccountsByOwner", params)
            .await
            .map_err(|e| read_failure(endpoint, e))?;
        let response: TokenAccountsDto = rpc::decode(value, "token accounts")?;
        let Some(first) = response.value.into_iter().next() else {
            tracing::debug!(%owner, mint = %asset.mint, "no token account, balance is zero");
            return Ok(AccountBalance::zero(*owner, asset));
        };
        let token_account = Pubkey::from_str(&first.pubkey)
            .map_err(|e| FlipError::decode("token account address", e))?;
        let token_amount = first.account.data.parsed.info.token_amount;
        let amount = token_amount
            .amount
            .parse::<u64>()
            .map_err(|e| FlipError::decode("token amount", e))?;
        Ok(AccountBalance {
            owner: *owner,
            mint: asset.mint,
            amount,
            decimals: token_amount.decimals,
            token_account: Some(token_account),
        })
    }

    /// Raw account data, or `None` when the account does not exist.
    pub async fn get_account_data(
        &self,
        endpoint: &Endpoint,
        address: &Pubkey,
    ) -> Result<Option<Vec<u8>>> {
        let params = json!([
            address.to_string(),
            { "encoding": "base64", "commitment": "confirmed" },
        ]);
        let value = self
            .transport
            .call(endpoint.url(), "getAccountInfo", params)
            .await
            .map_err(|e| read_failure(endpoint, e))?;
        let response: AccountInfoDto = rpc::decode(value, "account info")?;
        let Some(account) = response.value else {
            return Ok(None);
        };
        let (encoded, _encoding) = account.data;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| FlipError::decode("account data", e))?;
        Ok(Some(bytes))
    }

    pub async fn get_game_state(
        &self,
        endpoint: &Endpoint,
        address: &Pubkey,
    ) -> Result<Option<GameState>> {
        match self.get_account_data(endpoint, address).await? {
            Some(data) => GameState::decode(&data).map(Some),
            None => Ok(None),
        }
    }
}

pub(crate) fn read_failure(endpoint: &Endpoint, err: RpcError) -> FlipError {
    FlipError::TransientReadFailure {
        endpoint: endpoint.url().to_string(),
        reason: err.to_string(),
    }
}

#[derive(Deserialize)]
struct TokenAccountsDto {
    value: Vec<KeyedTokenAccountDto>,
}

#[derive(Deserialize)]
struct KeyedTokenAccountDto {
    pubkey: String,
    account: TokenAccountDto,
}

#[derive(Deserialize)]
struct TokenAccountDto {
    data: ParsedDataDto,
}

#[derive(Deserialize)]
struct ParsedDataDto {
    parsed: ParsedTokenDto,
}

#[derive(Deserialize)]
struct ParsedTokenDto {
    info: TokenInfoDto,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenInfoDto {
    token_amount: TokenAmountDto,
}

#[derive(Deserialize)]
struct TokenAmountDto {
    amount: String,
    decimals: u8,
}

#[derive(Deserialize)]
struct AccountInfoDto {
    value: Option<AccountDataDto>,
}

#[derive(Deserialize)]
struct AccountDataDto {
    data: (String, String),
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::{
        ScriptedTransport,
        token_accounts_response,
    };
    use rust_decimal_macros::dec;

    const URL: &str = "http://rpc.invalid";

    fn asset() -> Asset {
        Asset {
            mint: Pubkey::new_from_array([3u8; 32]),
            decimals: 9,
        }
    }

    #[tokio::test]
    async fn get_balance__returns_zero_when_owner_has_no_account() {
        // given
        let transport = ScriptedTransport::new();
        transport.respond(
            URL,
            "getTokenAccountsByOwner",
            json!({ "context": { "slot": 1 }, "value": [] }),
        );
        let reader = AccountReader::new(&transport);
        let owner = Pubkey::new_from_array([1u8; 32]);

        // when
        let balance = reader
            .get_balance(&Endpoint::new(URL), &owner, &asset())
            .await
            .unwrap();

        // then
        assert_eq!(balance.amount, 0);
        assert_eq!(balance.decimals, 9);
        assert_eq!(balance.token_account, None);
    }

    #[tokio::test]
    async fn get_balance__reads_first_matching_account() {
        // given
        let transport = ScriptedTransport::new();
        let token_account = Pubkey::new_from_array([5u8; 32]);
        transport.respond(
            URL,
            "getTokenAccountsByOwner",
            token_accounts_response(token_account, 1_500_000_000, 9),
        );
        let reader = AccountReader::new(&transport);

        // when
        let balance = reader
            .get_balance(&Endpoint::new(URL), &Pubkey::new_from_array([1u8; 32]), &asset())
            .await
            .unwrap();

        // then
        assert_eq!(balance.amount, 1_500_000_000);
        assert_eq!(balance.ui_amount(), dec!(1.5));
        assert_eq!(balance.token_account, Some(token_account));
    }

    #[tokio::test]
    async fn get_balance__reports_transport_failure_as_transient() {
        let transport = ScriptedTransport::new();
        transport.fail(URL, "getTokenAccountsByOwner", "connection reset");
        let reader = AccountReader::new(&transport);

        let err = reader
            .get_balance(&Endpoint::new(URL), &Pubkey::new_from_array([1u8; 32]), &asset())
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn get_account_data__returns_none_for_missing_account() {
        let transport = ScriptedTransport::new();
        transport.respond(
            URL,
            "getAccountInfo",
            json!({ "context": { "slot": 1 }, "value": null }),
        );
        let reader = AccountReader::new(&transport);

        let data = reader
            .get_account_data(&Endpoint::new(URL), &Pubkey::new_from_array([8u8; 32]))
            .await
            .unwrap();

        assert_eq!(data, None);
    }

    #[test]
    fn to_ui_amount__scales_by_decimals() {
        assert_eq!(to_ui_amount(196, 0), dec!(196));
        assert_eq!(to_ui_amount(1_960_000_000, 9), dec!(1.96));
        assert_eq!(to_ui_amount(0, 6), dec!(0));
    }
}

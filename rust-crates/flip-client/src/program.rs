//! Wire layout of the on-chain flip program: instruction data, the
//! `FlipResult` event, the `GameState` account and its custom error codes.
//! All integers are little-endian, preceded by an 8-byte discriminator.

use crate::error::{
    FlipError,
    Result,
};
use base64::{
    Engine,
    engine::general_purpose::STANDARD as BASE64,
};
use solana_sdk::{
    instruction::{
        AccountMeta,
        Instruction,
    },
    pubkey::Pubkey,
};
use spl_associated_token_account_client::address::get_associated_token_address_with_program_id;

pub const FLIP_DISCRIMINATOR: [u8; 8] = [24, 243, 78, 161, 192, 246, 102, 103];
pub const FLIP_RESULT_DISCRIMINATOR: [u8; 8] = [206, 27, 241, 188, 191, 121, 211, 88];
pub const GAME_STATE_DISCRIMINATOR: [u8; 8] = [144, 94, 208, 172, 248, 99, 134, 120];

/// SPL token program (`TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA`).
pub const TOKEN_PROGRAM_ID: Pubkey = Pubkey::new_from_array([
    6, 221, 246, 225, 215, 101, 161, 147, 217, 203, 225, 70, 206, 235, 121, 172, 28,
    180, 133, 237, 95, 91, 55, 145, 58, 140, 245, 133, 126, 255, 0, 169,
]);

pub const GAME_STATE_SEED: &[u8] = b"game_state";
pub const HOUSE_CUT_PERCENT: u64 = 2;

const PROGRAM_DATA_PREFIX: &str = "Program data: ";

/// Custom error codes the program returns when it refuses a flip.
pub fn rejection_message(code: u32) -> Option<&'static str> {
    match code {
        6000 => Some("Invalid wager amount"),
        6001 => Some("Insufficient vault balance for potential payout"),
        6002 => Some("Arithmetic overflow"),
        _ => None,
    }
}

/// Payout the program sends back on a win: twice the wager after the house
/// cut.
pub fn expected_payout(wager: u64) -> u64 {
    let house_cut = u128::from(wager) * u128::from(HOUSE_CUT_PERCENT) / 100;
    let net = u128::from(wager) - house_cut;
    u64::try_from(net * 2).unwrap_or(u64::MAX)
}

pub fn flip_instruction_data(wager: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(16);
    data.extend_from_slice(&FLIP_DISCRIMINATOR);
    data.extend_from_slice(&wager.to_le_bytes());
    data
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlipResultEvent {
    pub player: Pubkey,
    pub wager: u64,
    pub won: bool,
    pub payout: u64,
    pub house_cut: u64,
}

impl FlipResultEvent {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data, "FlipResult event");
        reader.discriminator(&FLIP_RESULT_DISCRIMINATOR)?;
        Ok(Self {
            player: reader.pubkey()?,
            wager: reader.u64()?,
            won: reader.bool()?,
            payout: reader.u64()?,
            house_cut: reader.u64()?,
        })
    }

    /// Decodes a `Program data: <base64>` log line. Lines carrying some other
    /// event or plain text yield `None`.
    pub fn from_log_line(line: &str) -> Option<Self> {
        let encoded = line.trim().strip_prefix(PROGRAM_DATA_PREFIX)?;
        let data = BASE64.decode(encoded.trim()).ok()?;
        if !data.starts_with(&FLIP_RESULT_DISCRIMINATOR) {
            return None;
        }
        Self::decode(&data).ok()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(8 + 32 + 8 + 1 + 8 + 8);
        data.extend_from_slice(&FLIP_RESULT_DISCRIMINATOR);
        data.extend_from_slice(self.player.as_ref());
        data.extend_from_slice(&self.wager.to_le_bytes());
        data.push(u8::from(self.won));
        data.extend_from_slice(&self.payout.to_le_bytes());
        data.extend_from_slice(&self.house_cut.to_le_bytes());
        data
    }

    pub fn to_log_line(&self) -> String {
        format!("{PROGRAM_DATA_PREFIX}{}", BASE64.encode(self.encode()))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GameState {
    pub authority: Pubkey,
    pub token_mint: Pubkey,
    pub vault_wallet: Pubkey,
    pub flip_count: u64,
    pub total_volume: u64,
    pub total_house_earnings: u64,
}

impl GameState {
    pub const LEN: usize = 8 + 32 * 3 + 8 * 3;

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data, "GameState account");
        reader.discriminator(&GAME_STATE_DISCRIMINATOR)?;
        Ok(Self {
            authority: reader.pubkey()?,
            token_mint: reader.pubkey()?,
            vault_wallet: reader.pubkey()?,
            flip_count: reader.u64()?,
            total_volume: reader.u64()?,
            total_house_earnings: reader.u64()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(Self::LEN);
        data.extend_from_slice(&GAME_STATE_DISCRIMINATOR);
        for key in [&self.authority, &self.token_mint, &self.vault_wallet] {
            data.extend_from_slice(key.as_ref());
        }
        for value in [self.flip_count, self.total_volume, self.total_house_earnings] {
            data.extend_from_slice(&value.to_le_bytes());
        }
        data
    }
}

/// Addresses of one deployment of the flip program, derived once.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlipProgram {
    pub program_id: Pubkey,
    pub mint: Pubkey,
    pub vault_wallet: Pubkey,
    pub game_state: Pubkey,
    pub vault_token_account: Pubkey,
}

impl FlipProgram {
    pub fn new(program_id: Pubkey, mint: Pubkey, vault_wallet: Pubkey) -> Result<Self> {
        let (game_state, _bump) =
            Pubkey::try_find_program_address(&[GAME_STATE_SEED], &program_id).ok_or_else(
                || FlipError::Config(format!("no game state address for {program_id}")),
            )?;
        let vault_token_account = associated_token_address(&vault_wallet, &mint);
        Ok(Self {
            program_id,
            mint,
            vault_wallet,
            game_state,
            vault_token_account,
        })
    }

    pub fn flip_instruction(
        &self,
        player: Pubkey,
        player_token_account: Pubkey,
        wager: u64,
    ) -> Instruction {
        Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(self.game_state, false),
                AccountMeta::new(player, true),
                AccountMeta::new(player_token_account, false),
                AccountMeta::new(self.vault_token_account, false),
                AccountMeta::new_readonly(self.vault_wallet, false),
                AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
            ],
            data: flip_instruction_data(wager),
        }
    }
}

/// Token account the associated-token program assigns to `owner` for `mint`.
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    get_associated_token_address_with_program_id(owner, mint, &TOKEN_PROGRAM_ID)
}

struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
    what: &'static str,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8], what: &'static str) -> Self {
        Self {
            data,
            offset: 0,
            what,
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.offset + len;
        let slice = self.data.get(self.offset..end).ok_or_else(|| {
            FlipError::decode(
                self.what,
                format!("need {end} bytes, have {}", self.data.len()),
            )
        })?;
        self.offset = end;
        Ok(slice)
    }

    fn discriminator(&mut self, expected: &[u8; 8]) -> Result<()> {
        if self.take(8)? != expected {
            return Err(FlipError::decode(self.what, "discriminator mismatch"));
        }
        Ok(())
    }

    fn pubkey(&mut self) -> Result<Pubkey> {
        let bytes: [u8; 32] = self
            .take(32)?
            .try_into()
            .map_err(|_| FlipError::decode(self.what, "short address"))?;
        Ok(Pubkey::new_from_array(bytes))
    }

    fn u64(&mut self) -> Result<u64> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| FlipError::decode(self.what, "short u64"))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn bool(&mut self) -> Result<bool> {
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(FlipError::decode(self.what, format!("invalid bool {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use sha2::{
        Digest,
        Sha256,
    };
    use std::str::FromStr;

    fn discriminator(preimage: &str) -> [u8; 8] {
        let hash = Sha256::digest(preimage.as_bytes());
        let mut out = [0u8; 8];
        out.copy_from_slice(&hash[..8]);
        out
    }

    #[test]
    fn discriminators__match_namespaced_hashes() {
        assert_eq!(FLIP_DISCRIMINATOR, discriminator("global:flip"));
        assert_eq!(FLIP_RESULT_DISCRIMINATOR, discriminator("event:FlipResult"));
        assert_eq!(GAME_STATE_DISCRIMINATOR, discriminator("account:GameState"));
    }

    #[test]
    fn expected_payout__doubles_wager_after_house_cut() {
        assert_eq!(expected_payout(100), 196);
        assert_eq!(expected_payout(1_000_000_000), 1_960_000_000);
        assert_eq!(expected_payout(49), 98);
        assert_eq!(expected_payout(u64::MAX), u64::MAX);
    }

    #[test]
    fn flip_instruction_data__is_discriminator_then_le_wager() {
        let data = flip_instruction_data(0x0102);
        assert_eq!(&data[..8], &FLIP_DISCRIMINATOR);
        assert_eq!(&data[8..], &[0x02, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn from_log_line__decodes_program_data_event() {
        // given
        let event = FlipResultEvent {
            player: Pubkey::new_from_array([4u8; 32]),
            wager: 100,
            won: true,
            payout: 196,
            house_cut: 2,
        };
        let line = event.to_log_line();

        // when
        let decoded = FlipResultEvent::from_log_line(&line);

        // then
        assert_eq!(decoded, Some(event));
    }

    #[test]
    fn from_log_line__ignores_unrelated_lines() {
        assert_eq!(FlipResultEvent::from_log_line("Program log: Instruction: Flip"), None);
        let other_event = format!("Program data: {}", BASE64.encode([0u8; 64]));
        assert_eq!(FlipResultEvent::from_log_line(&other_event), None);
    }

    #[test]
    fn decode__rejects_truncated_game_state() {
        let mut data = GAME_STATE_DISCRIMINATOR.to_vec();
        data.extend_from_slice(&[0u8; 40]);
        let err = GameState::decode(&data).unwrap_err();
        assert!(matches!(err, FlipError::Decode { .. }));
    }

    #[test]
    fn token_program_id__matches_base58_address() {
        assert_eq!(
            TOKEN_PROGRAM_ID,
            Pubkey::from_str("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA").unwrap()
        );
    }

    #[test]
    fn new__derives_game_state_and_vault_token_account() {
        // given
        let program_id = Pubkey::new_from_array([10u8; 32]);
        let mint = Pubkey::new_from_array([11u8; 32]);
        let vault = Pubkey::new_from_array([12u8; 32]);

        // when
        let program = FlipProgram::new(program_id, mint, vault).unwrap();

        // then
        let (game_state, _) = Pubkey::find_program_address(&[GAME_STATE_SEED], &program_id);
        assert_eq!(program.game_state, game_state);
        assert_eq!(program.vault_token_account, associated_token_address(&vault, &mint));
        assert_ne!(program.vault_token_account, associated_token_address(&mint, &vault));
    }

    #[test]
    fn flip_instruction__lists_accounts_in_program_order() {
        // given
        let program = FlipProgram::new(
            Pubkey::new_from_array([10u8; 32]),
            Pubkey::new_from_array([11u8; 32]),
            Pubkey::new_from_array([12u8; 32]),
        )
        .unwrap();
        let player = Pubkey::new_from_array([13u8; 32]);
        let player_ata = Pubkey::new_from_array([14u8; 32]);

        // when
        let ix = program.flip_instruction(player, player_ata, 500);

        // then
        let keys: Vec<Pubkey> = ix.accounts.iter().map(|meta| meta.pubkey).collect();
        assert_eq!(
            keys,
            vec![
                program.game_state,
                player,
                player_ata,
                program.vault_token_account,
                program.vault_wallet,
                TOKEN_PROGRAM_ID,
            ]
        );
        assert!(ix.accounts[1].is_signer);
        assert!(!ix.accounts[4].is_writable);
    }
}

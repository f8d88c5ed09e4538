use crate::{
    accounts::{
        AccountBalance,
        AccountReader,
        Asset,
    },
    config::ClientConfig,
    endpoint::{
        Endpoint,
        EndpointSelector,
    },
    error::{
        FlipError,
        Result,
    },
    history::{
        Actor,
        FlipHistory,
        Reconciler,
    },
    outcome::{
        OutcomeResolver,
        ResolverSettings,
        WagerOutcome,
    },
    program::{
        FlipProgram,
        GameState,
    },
    rpc::RpcTransport,
    wager::{
        Confirmation,
        WagerRequest,
        WagerSubmitter,
    },
};
use rust_decimal::Decimal;
use solana_sdk::{
    pubkey::Pubkey,
    signer::Signer,
};
use tracing::{
    info,
    warn,
};

/// One player's connection to a flip deployment. Owns the endpoint
/// selection state and the local display state; every flow runs through
/// `&mut self`, one at a time.
pub struct Session<T> {
    transport: T,
    config: ClientConfig,
    program: FlipProgram,
    selector: EndpointSelector,
    reconciler: Reconciler,
}

impl<T: RpcTransport> Session<T> {
    pub fn new(config: ClientConfig, transport: T) -> Result<Self> {
        config.validate()?;
        let program = FlipProgram::new(config.program_id, config.mint, config.vault_wallet)?;
        let selector = EndpointSelector::new(config.endpoints.iter().cloned())?;
        Ok(Self {
            transport,
            config,
            program,
            selector,
            reconciler: Reconciler::new(),
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn program(&self) -> &FlipProgram {
        &self.program
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        self.selector.endpoints()
    }

    pub fn history(&self) -> &FlipHistory {
        self.reconciler.history()
    }

    pub fn displayed_balance(&self) -> Option<&AccountBalance> {
        self.reconciler.balance()
    }

    pub fn displayed_pot(&self) -> Option<&AccountBalance> {
        self.reconciler.pot()
    }

    pub async fn active_endpoint(&mut self) -> Result<Endpoint> {
        self.selector.select(&self.transport).await
    }

    pub async fn probe_endpoints(&mut self) -> &[Endpoint] {
        self.selector.probe_all(&self.transport).await
    }

    pub async fn refresh_balance(&mut self, owner: &Pubkey) -> Result<AccountBalance> {
        let asset = self.config.asset();
        let (balance, _) = self.read_balance(owner, &asset).await?;
        self.reconciler.set_balance(balance.clone());
        Ok(balance)
    }

    /// The pot is the vault wallet's holding of the game token.
    pub async fn refresh_pot(&mut self) -> Result<AccountBalance> {
        let asset = self.config.asset();
        let vault = self.program.vault_wallet;
        let (pot, _) = self.read_balance(&vault, &asset).await?;
        self.reconciler.set_pot(pot.clone());
        Ok(pot)
    }

    pub async fn game_state(&mut self) -> Result<Option<GameState>> {
        let endpoint = self.selector.select(&self.transport).await?;
        AccountReader::new(&self.transport)
            .get_game_state(&endpoint, &self.program.game_state)
            .await
    }

    /// Pre-flight balance read, submission, confirmation, resolution and
    /// reconciliation, in that order. Nothing is recorded unless the wager
    /// was confirmed and its outcome resolved.
    pub async fn perform_wager(
        &mut self,
        signer: &dyn Signer,
        amount: Decimal,
    ) -> Result<WagerOutcome> {
        if amount <= Decimal::ZERO {
            return Err(FlipError::InvalidWager(amount.to_string()));
        }
        let player = signer.pubkey();
        let asset = self.config.asset();

        let (pre_balance, endpoint) = self.read_balance(&player, &asset).await?;
        self.reconciler.set_balance(pre_balance.clone());
        if pre_balance.token_account.is_some() && pre_balance.decimals != asset.decimals {
            warn!(
                configured = asset.decimals,
                reported = pre_balance.decimals,
                mint = %asset.mint,
                "token precision differs from configuration, using the reported one"
            );
        }
        let request = WagerRequest::new(player, asset, amount, &pre_balance)?;

        let submitter = WagerSubmitter::new(&self.transport, &self.program);
        let submitted = submitter.submit_wager(&endpoint, &request, signer).await;
        let (tx_id, endpoint) = match submitted {
            Err(err) if err.is_transient() => {
                warn!(?err, "wager preparation failed, retrying on another endpoint");
                self.selector.mark_failed();
                let endpoint = self.selector.select(&self.transport).await?;
                let tx_id = submitter.submit_wager(&endpoint, &request, signer).await?;
                (tx_id, endpoint)
            }
            other => (other?, endpoint),
        };
        let confirmation = submitter
            .await_confirmation(
                &endpoint,
                &tx_id,
                self.config.confirm_poll_interval(),
                self.config.confirm_attempts,
            )
            .await?;
        if confirmation == Confirmation::Pending {
            warn!(%tx_id, "wager never confirmed, leaving it unresolved");
            return Err(FlipError::OutcomeIndeterminate {
                tx_id: tx_id.to_string(),
            });
        }

        let resolver = OutcomeResolver::new(
            &self.transport,
            &self.program,
            ResolverSettings {
                settle_delay: self.config.settle_delay(),
                tolerance_fraction: self.config.tolerance_fraction,
                record_attempts: self.config.record_attempts,
                record_poll_interval: self.config.confirm_poll_interval(),
            },
        );
        let outcome = resolver
            .resolve_outcome(&endpoint, &tx_id, &pre_balance, request.amount_units())
            .await?;
        info!(
            %tx_id,
            won = outcome.won,
            payout = outcome.payout,
            resolution = ?outcome.resolution,
            "wager resolved"
        );

        self.reconciler.record(&outcome, Actor::Player(player));
        self.reconciler.apply_outcome(&outcome);
        if let Err(err) = self.refresh_balance(&player).await {
            warn!(?err, "post-wager balance refresh failed, keeping adjusted balance");
        }
        if let Err(err) = self.refresh_pot().await {
            warn!(?err, "post-wager pot refresh failed, keeping adjusted pot");
        }
        Ok(outcome)
    }

    /// Balance read that survives one transient failure by switching to the
    /// next live endpoint.
    async fn read_balance(
        &mut self,
        owner: &Pubkey,
        asset: &Asset,
    ) -> Result<(AccountBalance, Endpoint)> {
        let endpoint = self.selector.select(&self.transport).await?;
        let reader = AccountReader::new(&self.transport);
        match reader.get_balance(&endpoint, owner, asset).await {
            Err(err) if err.is_transient() => {
                warn!(?err, "balance read failed, retrying on another endpoint");
                self.selector.mark_failed();
                let endpoint = self.selector.select(&self.transport).await?;
                let balance = reader.get_balance(&endpoint, owner, asset).await?;
                Ok((balance, endpoint))
            }
            other => other.map(|balance| (balance, endpoint)),
        }
    }
}

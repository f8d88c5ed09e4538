pub mod accounts;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod history;
pub mod outcome;
pub mod program;
pub mod rpc;
pub mod session;
pub mod wager;
pub mod wallets;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use crate::{
    accounts::{
        AccountBalance,
        AccountReader,
        Asset,
    },
    config::{
        ClientConfig,
        NetworkProfile,
    },
    endpoint::{
        Endpoint,
        EndpointSelector,
        EndpointState,
    },
    error::{
        FlipError,
        Result,
    },
    history::{
        Actor,
        FlipHistory,
        HISTORY_DEPTH,
        HistoryEntry,
        Reconciler,
    },
    outcome::{
        InferenceMethod,
        OutcomeResolver,
        Resolution,
        WagerOutcome,
    },
    program::{
        FlipProgram,
        GameState,
    },
    rpc::{
        HttpTransport,
        RpcError,
        RpcTransport,
    },
    session::Session,
    wager::{
        TransactionId,
        WagerRequest,
        WagerSubmitter,
    },
    wallets::WalletDescriptor,
};

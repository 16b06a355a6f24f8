//! Toy contracts the harness executes: a token ledger that declares its
//! resources, and a name registry that does not.

use crate::state::TxState;
use alloy_primitives::{address, Address, Bytes};
use grouped_executor::{ProbeError, Resource, ResourceDeclaration, StateKey, Transaction};
use thiserror::Error;

/// Address of the token ledger contract.
pub const LEDGER: Address = address!("0000000000000000000000000000000000001001");

/// Address of the name registry contract.
pub const REGISTRY: Address = address!("0000000000000000000000000000000000001002");

/// Length of `Transfer` / `Mint` params: recipient (20 bytes) + amount (u64 BE).
const AMOUNT_PARAMS_LEN: usize = 20 + 8;

/// Reasons a contract call fails. Recorded as the transaction's error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("unknown method {0}")]
    UnknownMethod(String),
    #[error("malformed params: {0}")]
    MalformedParams(String),
    #[error("insufficient balance: {balance} < {amount}")]
    InsufficientBalance { balance: u64, amount: u64 },
    #[error("balance overflow")]
    Overflow,
    #[error("corrupt state at {0}")]
    CorruptState(StateKey),
}

/// The contracts deployed in the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Contract {
    Ledger,
    Registry,
}

impl Contract {
    /// Looks up the contract deployed at `address`.
    pub fn at(address: Address) -> Option<Self> {
        if address == LEDGER {
            Some(Contract::Ledger)
        } else if address == REGISTRY {
            Some(Contract::Registry)
        } else {
            None
        }
    }

    pub fn address(&self) -> Address {
        match self {
            Contract::Ledger => LEDGER,
            Contract::Registry => REGISTRY,
        }
    }

    /// Resource declaration for `tx`. `Ok(None)` if the contract has no
    /// declaration interface.
    pub fn declare_resources(&self, tx: &Transaction) -> Result<Option<ResourceDeclaration>, ProbeError> {
        match self {
            Contract::Ledger => declare_ledger(tx).map(Some),
            Contract::Registry => Ok(None),
        }
    }

    /// Runs `tx` against `state`, returning the call's return value.
    pub fn invoke(&self, tx: &Transaction, state: &mut TxState<'_, '_>) -> Result<Bytes, ContractError> {
        match (self, tx.method_name.as_str()) {
            (Contract::Ledger, "Transfer") => {
                let (to, amount) = decode_amount_params(&tx.params)?;
                let from_balance = read_balance(state, tx.from)?;
                let remaining = from_balance
                    .checked_sub(amount)
                    .ok_or(ContractError::InsufficientBalance {
                        balance: from_balance,
                        amount,
                    })?;
                state.write(balance_key(tx.from), encode_u64(remaining));

                let to_balance = read_balance(state, to)?;
                let credited = to_balance.checked_add(amount).ok_or(ContractError::Overflow)?;
                state.write(balance_key(to), encode_u64(credited));
                Ok(encode_u64(remaining))
            }
            (Contract::Ledger, "Mint") => {
                let (to, amount) = decode_amount_params(&tx.params)?;
                let supply = read_u64(state, &supply_key())?;
                let supply = supply.checked_add(amount).ok_or(ContractError::Overflow)?;
                let balance = read_balance(state, to)?;
                let balance = balance.checked_add(amount).ok_or(ContractError::Overflow)?;
                state.write(supply_key(), encode_u64(supply));
                state.write(balance_key(to), encode_u64(balance));
                Ok(encode_u64(supply))
            }
            (Contract::Registry, "Register") => {
                let name = std::str::from_utf8(&tx.params)
                    .map_err(|err| ContractError::MalformedParams(err.to_string()))?;
                if name.is_empty() {
                    state.delete(name_key(tx.from));
                } else {
                    state.write(name_key(tx.from), tx.params.clone());
                }
                Ok(Bytes::new())
            }
            (_, method) => Err(ContractError::UnknownMethod(method.to_string())),
        }
    }
}

fn declare_ledger(tx: &Transaction) -> Result<ResourceDeclaration, ProbeError> {
    let (to, _) = decode_amount_params(&tx.params).map_err(|err| ProbeError::Malformed(err.to_string()))?;
    match tx.method_name.as_str() {
        "Transfer" => Ok(ResourceDeclaration {
            resources: vec![balance_resource(tx.from), balance_resource(to)],
            non_parallelizable: false,
        }),
        // Every mint touches the total supply.
        "Mint" => Ok(ResourceDeclaration {
            resources: vec![balance_resource(to), Resource::scoped(LEDGER, &["Supply"])],
            non_parallelizable: true,
        }),
        method => Err(ProbeError::Failed(format!("unknown method {method}"))),
    }
}

fn balance_resource(account: Address) -> Resource {
    Resource::scoped(LEDGER, &["Balances", &account.to_string()])
}

pub fn balance_key(account: Address) -> StateKey {
    balance_resource(account).into_state_key()
}

pub fn supply_key() -> StateKey {
    Resource::scoped(LEDGER, &["Supply"]).into_state_key()
}

pub fn name_key(account: Address) -> StateKey {
    Resource::scoped(REGISTRY, &["Names", &account.to_string()]).into_state_key()
}

pub fn encode_u64(value: u64) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

fn read_u64(state: &mut TxState<'_, '_>, key: &str) -> Result<u64, ContractError> {
    match state.read(key) {
        None => Ok(0),
        Some(bytes) => {
            let raw: [u8; 8] = bytes
                .as_ref()
                .try_into()
                .map_err(|_| ContractError::CorruptState(key.to_string()))?;
            Ok(u64::from_be_bytes(raw))
        }
    }
}

fn read_balance(state: &mut TxState<'_, '_>, account: Address) -> Result<u64, ContractError> {
    read_u64(state, &balance_key(account))
}

fn encode_amount_params(to: Address, amount: u64) -> Bytes {
    let mut params = Vec::with_capacity(AMOUNT_PARAMS_LEN);
    params.extend_from_slice(to.as_slice());
    params.extend_from_slice(&amount.to_be_bytes());
    params.into()
}

fn decode_amount_params(params: &[u8]) -> Result<(Address, u64), ContractError> {
    if params.len() != AMOUNT_PARAMS_LEN {
        return Err(ContractError::MalformedParams(format!(
            "expected {AMOUNT_PARAMS_LEN} bytes, got {}",
            params.len()
        )));
    }
    let (to, amount) = params.split_at(20);
    let mut raw = [0u8; 8];
    raw.copy_from_slice(amount);
    Ok((Address::from_slice(to), u64::from_be_bytes(raw)))
}

/// Builds a ledger transfer.
pub fn transfer(from: Address, to: Address, amount: u64, nonce: u64) -> Transaction {
    Transaction::new(from, LEDGER, "Transfer", encode_amount_params(to, amount), nonce)
}

/// Builds a ledger mint. Mints always execute serially.
pub fn mint(from: Address, to: Address, amount: u64, nonce: u64) -> Transaction {
    Transaction::new(from, LEDGER, "Mint", encode_amount_params(to, amount), nonce)
}

/// Builds a registry call setting the sender's name. An empty name clears it.
pub fn register(from: Address, name: &str, nonce: u64) -> Transaction {
    Transaction::new(from, REGISTRY, "Register", Bytes::copy_from_slice(name.as_bytes()), nonce)
}

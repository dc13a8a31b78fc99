//! Job variants that trigger on indexed logs.
//!
//! Each job type carries only its own fields. A job that reacts to an
//! on-chain event exposes a [`LogTrigger`]: the filter it registers with the
//! poller and the confirmation-gated query it runs through [`LogQuery`].

use alloy_primitives::{keccak256, Address, B256};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::LogQuery;
use crate::store::LogStore;
use crate::types::{Log, LogFilter};

/// Solidity signatures of the events each job type listens for.
pub mod events {
    pub const ORACLE_REQUEST: &str =
        "OracleRequest(bytes32,address,bytes32,uint256,address,bytes4,uint256,uint256,bytes)";
    pub const CONFIG_SET: &str =
        "ConfigSet(uint32,uint64,address[],address[],uint8,uint64,bytes)";
    pub const UPKEEP_PERFORMED: &str = "UpkeepPerformed(uint256,bool,address,uint96,bytes)";
    pub const RANDOMNESS_REQUEST: &str =
        "RandomnessRequest(bytes32,uint256,bytes32,address,uint256,bytes32)";
}

/// topic0 for a Solidity event signature.
pub fn event_sig(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum JobSpec {
    DirectRequest {
        contract_address: Address,
        #[serde(default)]
        min_incoming_confirmations: u64,
    },
    OffchainReporting {
        contract_address: Address,
        #[serde(default = "default_config_confirmations")]
        contract_config_confirmations: u64,
    },
    Keeper {
        registry_address: Address,
        #[serde(default)]
        min_incoming_confirmations: u64,
    },
    Vrf {
        coordinator_address: Address,
        #[serde(default)]
        min_incoming_confirmations: u64,
    },
    Cron {
        schedule: String,
    },
}

fn default_config_confirmations() -> u64 {
    3
}

impl JobSpec {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::DirectRequest { .. } => "directrequest",
            Self::OffchainReporting { .. } => "offchainreporting",
            Self::Keeper { .. } => "keeper",
            Self::Vrf { .. } => "vrf",
            Self::Cron { .. } => "cron",
        }
    }

    /// The on-chain event this job waits for. `None` for time-driven jobs.
    pub fn log_trigger(&self) -> Option<LogTrigger> {
        let (address, signature, confs) = match self {
            Self::DirectRequest {
                contract_address,
                min_incoming_confirmations,
            } => (*contract_address, events::ORACLE_REQUEST, *min_incoming_confirmations),
            Self::OffchainReporting {
                contract_address,
                contract_config_confirmations,
            } => (*contract_address, events::CONFIG_SET, *contract_config_confirmations),
            Self::Keeper {
                registry_address,
                min_incoming_confirmations,
            } => (*registry_address, events::UPKEEP_PERFORMED, *min_incoming_confirmations),
            Self::Vrf {
                coordinator_address,
                min_incoming_confirmations,
            } => (*coordinator_address, events::RANDOMNESS_REQUEST, *min_incoming_confirmations),
            Self::Cron { .. } => return None,
        };
        Some(LogTrigger {
            address,
            event_sig: event_sig(signature),
            confs,
        })
    }
}

/// A confirmation-gated subscription to one event on one contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogTrigger {
    pub address: Address,
    pub event_sig: B256,
    pub confs: u64,
}

impl LogTrigger {
    /// Filter to register with the poller so the event gets indexed.
    pub fn filter(&self) -> LogFilter {
        LogFilter::address(self.address).event_sig(self.event_sig)
    }

    /// Latest occurrence that has reached the required depth, if any.
    pub async fn poll<S: LogStore + ?Sized>(&self, query: &LogQuery<S>) -> Result<Option<Log>> {
        query
            .latest_confirmed(self.event_sig, self.address, self.confs)
            .await
    }
}

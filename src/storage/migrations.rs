// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The ordered schema migration sequence. Versions are dense: applying every
//! up migration to an empty database yields the latest schema, and the
//! runner refuses sequences with gaps or duplicates.

use crate::model::Version;
use crate::storage::StorageError;

/// One reversible schema change. `{schema}` in the DDL is replaced with the
/// configured schema name before execution.
pub struct Migration {
    pub version: Version,
    pub up: &'static str,
    pub down: &'static str,
    /// Statements that cannot run inside a transaction (e.g. concurrent
    /// index builds) are executed outside one.
    pub transactional: bool,
}

/// Latest schema version this binary knows.
pub fn latest_schema_version() -> Version {
    migrations()
        .last()
        .map(|m| m.version)
        .unwrap_or(Version::new(0, 0))
}

/// Checks the migration sequence between two versions: strictly increasing,
/// no duplicates, no gaps (patches increase by one within a major, majors
/// increase by one starting a new patch sequence at zero).
pub fn check_migration_sequence(from: Version, to: Version) -> Result<(), StorageError> {
    let migs = migrations();
    if migs.is_empty() {
        return Err(StorageError::Migration("no migrations defined".into()));
    }

    let mut prev: Option<Version> = None;
    for m in migs {
        if let Some(p) = prev {
            if m.version == p {
                return Err(StorageError::Migration(format!(
                    "duplicate migration version {}",
                    m.version
                )));
            }
            let dense_patch = m.version.major == p.major && m.version.patch == p.patch + 1;
            let dense_major = m.version.major == p.major + 1 && m.version.patch == 0;
            if !dense_patch && !dense_major {
                return Err(StorageError::Migration(format!(
                    "migration sequence has a gap between {} and {}",
                    p, m.version
                )));
            }
        } else if m.version != Version::new(1, 0) {
            return Err(StorageError::Migration(format!(
                "migration sequence must start at 1.0, found {}",
                m.version
            )));
        }
        prev = Some(m.version);
    }

    let (lo, hi) = if from <= to { (from, to) } else { (to, from) };
    for v in [lo, hi] {
        if v != Version::new(0, 0) && !migs.iter().any(|m| m.version == v) {
            return Err(StorageError::Migration(format!(
                "unknown schema version {}",
                v
            )));
        }
    }
    Ok(())
}

pub fn migrations() -> &'static [Migration] {
    MIGRATIONS
}

static MIGRATIONS: &[Migration] = &[
    Migration {
        version: Version::new(1, 0),
        up: BASE_SCHEMA_UP,
        down: BASE_SCHEMA_DOWN,
        transactional: true,
    },
    Migration {
        version: Version::new(1, 1),
        up: GAP_REPORTS_UP,
        down: GAP_REPORTS_DOWN,
        transactional: true,
    },
    Migration {
        version: Version::new(2, 0),
        up: ACTOR_NAME_UP,
        down: ACTOR_NAME_DOWN,
        transactional: true,
    },
];

const BASE_SCHEMA_UP: &str = r#"
CREATE TABLE IF NOT EXISTS "{schema}"."visor_version" (
    "major" bigint NOT NULL,
    "patch" bigint NOT NULL,
    PRIMARY KEY ("major")
);

CREATE TABLE IF NOT EXISTS "{schema}"."block_headers" (
    "height" bigint NOT NULL,
    "cid" text NOT NULL,
    "miner" text NOT NULL,
    "parent_weight" numeric NOT NULL,
    "parent_base_fee" numeric NOT NULL,
    "parent_state_root" text NOT NULL,
    "win_count" bigint NOT NULL,
    "timestamp" bigint NOT NULL,
    "fork_signal" bigint NOT NULL,
    PRIMARY KEY ("height", "cid")
);

CREATE TABLE IF NOT EXISTS "{schema}"."block_parents" (
    "height" bigint NOT NULL,
    "block" text NOT NULL,
    "parent" text NOT NULL,
    PRIMARY KEY ("height", "block", "parent")
);

CREATE TABLE IF NOT EXISTS "{schema}"."drand_block_entries" (
    "round" bigint NOT NULL,
    "block" text NOT NULL,
    PRIMARY KEY ("round", "block")
);

CREATE TABLE IF NOT EXISTS "{schema}"."messages" (
    "height" bigint NOT NULL,
    "cid" text NOT NULL,
    "from" text NOT NULL,
    "to" text NOT NULL,
    "value" numeric NOT NULL,
    "gas_fee_cap" numeric NOT NULL,
    "gas_premium" numeric NOT NULL,
    "gas_limit" bigint NOT NULL,
    "size_bytes" bigint NOT NULL,
    "nonce" bigint NOT NULL,
    "method" bigint NOT NULL,
    PRIMARY KEY ("height", "cid")
);

CREATE TABLE IF NOT EXISTS "{schema}"."block_messages" (
    "height" bigint NOT NULL,
    "block" text NOT NULL,
    "message" text NOT NULL,
    PRIMARY KEY ("height", "block", "message")
);

CREATE TABLE IF NOT EXISTS "{schema}"."receipts" (
    "height" bigint NOT NULL,
    "message" text NOT NULL,
    "state_root" text NOT NULL,
    "idx" bigint NOT NULL,
    "exit_code" bigint NOT NULL,
    "gas_used" bigint NOT NULL,
    PRIMARY KEY ("height", "message", "state_root")
);

CREATE TABLE IF NOT EXISTS "{schema}"."parsed_messages" (
    "height" bigint NOT NULL,
    "cid" text NOT NULL,
    "from" text NOT NULL,
    "to" text NOT NULL,
    "value" numeric NOT NULL,
    "method" text NOT NULL,
    "params" jsonb,
    PRIMARY KEY ("height", "cid")
);

CREATE TABLE IF NOT EXISTS "{schema}"."derived_gas_outputs" (
    "height" bigint NOT NULL,
    "cid" text NOT NULL,
    "state_root" text NOT NULL,
    "from" text NOT NULL,
    "to" text NOT NULL,
    "value" numeric NOT NULL,
    "gas_fee_cap" numeric NOT NULL,
    "gas_premium" numeric NOT NULL,
    "gas_limit" bigint NOT NULL,
    "nonce" bigint NOT NULL,
    "method" bigint NOT NULL,
    "exit_code" bigint NOT NULL,
    "gas_used" bigint NOT NULL,
    "parent_base_fee" numeric NOT NULL,
    "base_fee_burn" numeric NOT NULL,
    "over_estimation_burn" numeric NOT NULL,
    "miner_penalty" numeric NOT NULL,
    "miner_tip" numeric NOT NULL,
    "refund" numeric NOT NULL,
    "gas_refund" bigint NOT NULL,
    "gas_burned" bigint NOT NULL,
    PRIMARY KEY ("height", "cid", "state_root")
);

CREATE TABLE IF NOT EXISTS "{schema}"."message_gas_economy" (
    "height" bigint NOT NULL,
    "state_root" text NOT NULL,
    "gas_limit_total" bigint NOT NULL,
    "gas_limit_unique_total" bigint NOT NULL,
    "base_fee" double precision NOT NULL,
    "base_fee_change_log" double precision NOT NULL,
    "gas_fill_ratio" double precision NOT NULL,
    "gas_capacity_ratio" double precision NOT NULL,
    "gas_waste_ratio" double precision NOT NULL,
    PRIMARY KEY ("height", "state_root")
);

CREATE TABLE IF NOT EXISTS "{schema}"."chain_consensus" (
    "height" bigint NOT NULL,
    "parent_state_root" text NOT NULL,
    "parent_tipset" text NOT NULL,
    "tipset" text,
    PRIMARY KEY ("height")
);

CREATE TABLE IF NOT EXISTS "{schema}"."chain_rewards" (
    "height" bigint NOT NULL,
    "state_root" text NOT NULL,
    "cum_sum_baseline" numeric NOT NULL,
    "cum_sum_realized" numeric NOT NULL,
    "effective_baseline_power" numeric NOT NULL,
    "new_baseline_power" numeric NOT NULL,
    "new_reward_smoothed_position_estimate" numeric NOT NULL,
    "new_reward_smoothed_velocity_estimate" numeric NOT NULL,
    "total_mined_reward" numeric NOT NULL,
    "new_reward" numeric NOT NULL,
    "effective_network_time" bigint NOT NULL,
    PRIMARY KEY ("height", "state_root")
);

CREATE TABLE IF NOT EXISTS "{schema}"."chain_powers" (
    "height" bigint NOT NULL,
    "state_root" text NOT NULL,
    "total_raw_bytes_power" numeric NOT NULL,
    "total_qa_bytes_power" numeric NOT NULL,
    "total_pledge_collateral" numeric NOT NULL,
    "qa_smoothed_position_estimate" numeric NOT NULL,
    "qa_smoothed_velocity_estimate" numeric NOT NULL,
    "miner_count" bigint NOT NULL,
    "participating_miner_count" bigint NOT NULL,
    PRIMARY KEY ("height", "state_root")
);

CREATE TABLE IF NOT EXISTS "{schema}"."miner_infos" (
    "height" bigint NOT NULL,
    "miner_id" text NOT NULL,
    "state_root" text NOT NULL,
    "owner_id" text NOT NULL,
    "worker_id" text NOT NULL,
    "new_worker" text,
    "worker_change_epoch" bigint NOT NULL,
    "peer_id" text,
    "control_addresses" text[],
    "sector_size" bigint NOT NULL,
    PRIMARY KEY ("height", "miner_id", "state_root")
);

CREATE TABLE IF NOT EXISTS "{schema}"."miner_locked_funds" (
    "height" bigint NOT NULL,
    "miner_id" text NOT NULL,
    "state_root" text NOT NULL,
    "locked_funds" numeric NOT NULL,
    "initial_pledge" numeric NOT NULL,
    "pre_commit_deposits" numeric NOT NULL,
    PRIMARY KEY ("height", "miner_id", "state_root")
);

CREATE TABLE IF NOT EXISTS "{schema}"."market_deal_proposals" (
    "height" bigint NOT NULL,
    "deal_id" bigint NOT NULL,
    "state_root" text NOT NULL,
    "padded_piece_size" bigint NOT NULL,
    "unpadded_piece_size" bigint NOT NULL,
    "start_epoch" bigint NOT NULL,
    "end_epoch" bigint NOT NULL,
    "client_id" text NOT NULL,
    "provider_id" text NOT NULL,
    "client_collateral" numeric NOT NULL,
    "provider_collateral" numeric NOT NULL,
    "storage_price_per_epoch" numeric NOT NULL,
    "piece_cid" text NOT NULL,
    "is_verified" boolean NOT NULL,
    "label" text,
    PRIMARY KEY ("height", "deal_id")
);

CREATE TABLE IF NOT EXISTS "{schema}"."market_deal_states" (
    "height" bigint NOT NULL,
    "deal_id" bigint NOT NULL,
    "state_root" text NOT NULL,
    "sector_start_epoch" bigint NOT NULL,
    "last_update_epoch" bigint NOT NULL,
    "slash_epoch" bigint NOT NULL,
    PRIMARY KEY ("height", "deal_id", "state_root")
);

CREATE TABLE IF NOT EXISTS "{schema}"."multisig_transactions" (
    "height" bigint NOT NULL,
    "multisig_id" text NOT NULL,
    "state_root" text NOT NULL,
    "transaction_id" bigint NOT NULL,
    "to" text NOT NULL,
    "value" numeric NOT NULL,
    "method" bigint NOT NULL,
    "params" bytea,
    "approved" text[],
    PRIMARY KEY ("height", "multisig_id", "state_root", "transaction_id")
);

CREATE TABLE IF NOT EXISTS "{schema}"."multisig_approvals" (
    "height" bigint NOT NULL,
    "state_root" text NOT NULL,
    "multisig_id" text NOT NULL,
    "message" text NOT NULL,
    "method" bigint NOT NULL,
    "approver" text NOT NULL,
    "threshold" bigint NOT NULL,
    "initial_balance" numeric NOT NULL,
    "gas_used" bigint NOT NULL,
    "transaction_id" bigint NOT NULL,
    "to" text NOT NULL,
    "value" numeric NOT NULL,
    "signers" text[],
    PRIMARY KEY ("height", "state_root", "multisig_id", "message")
);

CREATE TABLE IF NOT EXISTS "{schema}"."id_addresses" (
    "height" bigint NOT NULL,
    "id" text NOT NULL,
    "address" text NOT NULL,
    "state_root" text NOT NULL,
    PRIMARY KEY ("height", "id", "address", "state_root")
);

CREATE TABLE IF NOT EXISTS "{schema}"."actors" (
    "height" bigint NOT NULL,
    "id" text NOT NULL,
    "state_root" text NOT NULL,
    "code" text NOT NULL,
    "head" text NOT NULL,
    "balance" numeric NOT NULL,
    "nonce" bigint NOT NULL,
    PRIMARY KEY ("height", "id", "state_root")
);

CREATE TABLE IF NOT EXISTS "{schema}"."actor_states" (
    "height" bigint NOT NULL,
    "head" text NOT NULL,
    "code" text NOT NULL,
    "state_root" text NOT NULL,
    "state" jsonb,
    PRIMARY KEY ("height", "head", "code", "state_root")
);

CREATE TABLE IF NOT EXISTS "{schema}"."visor_processing_reports" (
    "height" bigint NOT NULL,
    "state_root" text NOT NULL,
    "reporter" text NOT NULL,
    "task" text NOT NULL,
    "started_at" timestamptz NOT NULL,
    "completed_at" timestamptz,
    "status" text NOT NULL,
    "status_information" text,
    "errors_detected" jsonb,
    PRIMARY KEY ("height", "state_root", "reporter", "task")
);
"#;

const BASE_SCHEMA_DOWN: &str = r#"
DROP TABLE IF EXISTS "{schema}"."visor_processing_reports";
DROP TABLE IF EXISTS "{schema}"."actor_states";
DROP TABLE IF EXISTS "{schema}"."actors";
DROP TABLE IF EXISTS "{schema}"."id_addresses";
DROP TABLE IF EXISTS "{schema}"."multisig_approvals";
DROP TABLE IF EXISTS "{schema}"."multisig_transactions";
DROP TABLE IF EXISTS "{schema}"."market_deal_states";
DROP TABLE IF EXISTS "{schema}"."market_deal_proposals";
DROP TABLE IF EXISTS "{schema}"."miner_locked_funds";
DROP TABLE IF EXISTS "{schema}"."miner_infos";
DROP TABLE IF EXISTS "{schema}"."chain_powers";
DROP TABLE IF EXISTS "{schema}"."chain_rewards";
DROP TABLE IF EXISTS "{schema}"."chain_consensus";
DROP TABLE IF EXISTS "{schema}"."message_gas_economy";
DROP TABLE IF EXISTS "{schema}"."derived_gas_outputs";
DROP TABLE IF EXISTS "{schema}"."parsed_messages";
DROP TABLE IF EXISTS "{schema}"."receipts";
DROP TABLE IF EXISTS "{schema}"."block_messages";
DROP TABLE IF EXISTS "{schema}"."messages";
DROP TABLE IF EXISTS "{schema}"."drand_block_entries";
DROP TABLE IF EXISTS "{schema}"."block_parents";
DROP TABLE IF EXISTS "{schema}"."block_headers";
DROP TABLE IF EXISTS "{schema}"."visor_version";
"#;

const GAP_REPORTS_UP: &str = r#"
CREATE TABLE IF NOT EXISTS "{schema}"."visor_gap_reports" (
    "height" bigint NOT NULL,
    "task" text NOT NULL,
    "reporter" text NOT NULL,
    "status" text NOT NULL,
    "reported_at" timestamptz NOT NULL,
    PRIMARY KEY ("height", "task", "reporter")
);

CREATE INDEX IF NOT EXISTS "idx_processing_reports_height"
    ON "{schema}"."visor_processing_reports" ("height");
"#;

const GAP_REPORTS_DOWN: &str = r#"
DROP INDEX IF EXISTS "{schema}"."idx_processing_reports_height";
DROP TABLE IF EXISTS "{schema}"."visor_gap_reports";
"#;

const ACTOR_NAME_UP: &str = r#"
ALTER TABLE "{schema}"."derived_gas_outputs"
    ADD COLUMN IF NOT EXISTS "actor_name" text NOT NULL DEFAULT '';
"#;

const ACTOR_NAME_DOWN: &str = r#"
ALTER TABLE "{schema}"."derived_gas_outputs"
    DROP COLUMN IF EXISTS "actor_name";
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_consistent() {
        check_migration_sequence(Version::new(0, 0), latest_schema_version()).unwrap();
    }

    #[test]
    fn latest_version_is_last_migration() {
        assert_eq!(latest_schema_version(), Version::new(2, 0));
        assert_eq!(latest_schema_version().major, crate::model::MAJOR_VERSION);
    }

    #[test]
    fn unknown_target_is_rejected() {
        let err = check_migration_sequence(Version::new(0, 0), Version::new(9, 9)).unwrap_err();
        assert!(err.to_string().contains("unknown schema version"));
    }

    #[test]
    fn ddl_covers_every_model_table() {
        use crate::model::ModelRow;

        let all_ddl: String = migrations().iter().map(|m| m.up).collect();
        for table in [
            crate::model::blocks::BlockHeader::SPEC.table,
            crate::model::blocks::BlockParent::SPEC.table,
            crate::model::blocks::DrandBlockEntry::SPEC.table,
            crate::model::messages::Message::SPEC.table,
            crate::model::messages::BlockMessage::SPEC.table,
            crate::model::messages::Receipt::SPEC.table,
            crate::model::messages::ParsedMessage::SPEC.table,
            crate::model::messages::DerivedGasOutputs::SPEC.table,
            crate::model::messages::MessageGasEconomy::SPEC.table,
            crate::model::chain::ChainConsensus::SPEC.table,
            crate::model::actors::ChainReward::SPEC.table,
            crate::model::actors::ChainPower::SPEC.table,
            crate::model::actors::MinerInfo::SPEC.table,
            crate::model::actors::MinerLockedFund::SPEC.table,
            crate::model::actors::MarketDealProposal::SPEC.table,
            crate::model::actors::MarketDealState::SPEC.table,
            crate::model::actors::MultisigTransaction::SPEC.table,
            crate::model::msapprovals::MultisigApproval::SPEC.table,
            crate::model::actors::IdAddress::SPEC.table,
            crate::model::actors::Actor::SPEC.table,
            crate::model::actors::ActorState::SPEC.table,
            crate::model::reports::ProcessingReport::SPEC.table,
            crate::model::reports::GapReport::SPEC.table,
        ] {
            assert!(
                all_ddl.contains(&format!("\"{}\"", table)),
                "no DDL for table {}",
                table
            );
        }
    }
}

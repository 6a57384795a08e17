//! EVM router bridge with multi-RPC failover and a remote MPC signer

use super::{
    BlockTag, BuildTxArgs, ChainBridge, RawTransaction, SignedTransaction, TransactionInfo,
    TxOutcome,
};
use crate::config::ChainConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::tx::NonceManager;

use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const SWAP_IN_ARGS: &str = "(bytes32,address,address,uint256,uint256)";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MpcSignRequest {
    chain_id: String,
    from: String,
    unsigned_tx: String,
    sighash: String,
    swap_id: String,
    log_index: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MpcSignResponse {
    raw: String,
    tx_hash: String,
}

/// Router bridge for one EVM destination chain
pub struct EvmBridge {
    config: ChainConfig,
    numeric_chain_id: u64,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    current_provider: AtomicUsize,
    signer: Provider<Http>,
    mpc_address: Address,
    router: Address,
    nonces: NonceManager,
}

impl EvmBridge {
    pub async fn new(config: ChainConfig) -> RelayerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider.interval(Duration::from_millis(100)));
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::ChainConnection {
                chain_id: config.chain_id.clone(),
                message: "No valid RPC providers".to_string(),
            });
        }

        let signer = Provider::<Http>::try_from(config.signer_url.as_str()).map_err(|e| {
            RelayerError::Config(format!("chain {} signer url: {}", config.chain_id, e))
        })?;

        let numeric_chain_id = config.chain_id.parse::<u64>().map_err(|_| {
            RelayerError::Config(format!("chain id {} is not numeric", config.chain_id))
        })?;
        let mpc_address = parse_address(&config.mpc_address)
            .map_err(|_| RelayerError::Config(format!("bad mpc address {}", config.mpc_address)))?;
        let router = parse_address(&config.router_contract).map_err(|_| {
            RelayerError::Config(format!("bad router address {}", config.router_contract))
        })?;

        let nonces = NonceManager::new(config.chain_id.clone());

        Ok(Self {
            config,
            numeric_chain_id,
            http_providers,
            current_provider: AtomicUsize::new(0),
            signer,
            mpc_address,
            router,
            nonces,
        })
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    fn connection_error(&self, message: impl ToString) -> RelayerError {
        RelayerError::ChainConnection {
            chain_id: self.config.chain_id.clone(),
            message: message.to_string(),
        }
    }

    async fn fetch_transaction(&self, hash: H256) -> RelayerResult<Option<Transaction>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_transaction(hash).await {
                Ok(tx) => return Ok(tx),
                Err(e) => {
                    warn!("Failed to get transaction from chain {}: {}", self.config.chain_id, e);
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to get transaction"))
    }

    /// Unsigned legacy transaction for a raw settlement
    fn to_typed(&self, raw: &RawTransaction) -> RelayerResult<TypedTransaction> {
        let to = parse_address(&raw.to)?;
        let value = parse_uint(&raw.value)?;
        let gas_price = parse_uint(&raw.gas_price)?;

        let request = TransactionRequest::new()
            .from(self.mpc_address)
            .to(to)
            .value(value)
            .data(Bytes::from(raw.input.clone()))
            .nonce(raw.nonce)
            .gas(raw.gas_limit)
            .gas_price(gas_price)
            .chain_id(self.numeric_chain_id);

        Ok(request.into())
    }
}

#[async_trait]
impl ChainBridge for EvmBridge {
    fn chain_id(&self) -> String {
        self.config.chain_id.clone()
    }

    fn mpc_address(&self) -> String {
        format!("{:?}", self.mpc_address)
    }

    fn confirmations(&self) -> u64 {
        self.config.confirmations
    }

    async fn build_raw_transaction(&self, args: &BuildTxArgs) -> RelayerResult<RawTransaction> {
        let nonce = match args.replace_nonce {
            Some(nonce) => nonce,
            None => {
                let chain_nonce = self.get_account_nonce(&args.from, BlockTag::Pending).await?;
                self.nonces.reconcile(&args.from, chain_nonce)
            }
        };

        let input = encode_swap_in(args)?;

        let gas_price = self
            .http()
            .get_gas_price()
            .await
            .map_err(|e| self.connection_error(e))?;
        let gas_price = gas_price + gas_price * self.config.gas_price_buffer_percent / 100u64;

        let estimate: TypedTransaction = TransactionRequest::new()
            .from(self.mpc_address)
            .to(self.router)
            .data(Bytes::from(input.clone()))
            .chain_id(self.numeric_chain_id)
            .into();
        let gas = self
            .http()
            .estimate_gas(&estimate, None)
            .await
            .map_err(|e| RelayerError::Transaction(format!("gas estimation failed: {}", e)))?;
        let gas_limit = (gas + gas / 5u64).as_u64();

        debug!(
            chain_id = %self.config.chain_id,
            swap_id = %args.swap_id,
            nonce,
            gas_limit,
            "Built settlement transaction"
        );

        Ok(RawTransaction {
            chain_id: self.config.chain_id.clone(),
            to: format!("{:?}", self.router),
            value: "0".to_string(),
            input,
            nonce,
            gas_limit,
            gas_price: gas_price.to_string(),
        })
    }

    async fn sign_transaction(
        &self,
        raw: &RawTransaction,
        args: &BuildTxArgs,
    ) -> RelayerResult<SignedTransaction> {
        let tx = self.to_typed(raw)?;
        let signer_error = |message: String| RelayerError::Signer {
            chain_id: self.config.chain_id.clone(),
            message,
        };

        let request = MpcSignRequest {
            chain_id: self.config.chain_id.clone(),
            from: format!("{:?}", self.mpc_address),
            unsigned_tx: format!("0x{}", hex::encode(tx.rlp())),
            sighash: format!("{:?}", tx.sighash()),
            swap_id: args.swap_id.clone(),
            log_index: args.log_index,
        };

        let response: MpcSignResponse = self
            .signer
            .request("mpc_signTransaction", [request])
            .await
            .map_err(|e| signer_error(e.to_string()))?;

        let raw_bytes = hex::decode(response.raw.trim_start_matches("0x"))
            .map_err(|e| signer_error(format!("bad raw transaction: {}", e)))?;
        let tx_hash = format!("0x{}", hex::encode(Keccak256::digest(&raw_bytes)));

        if !response.tx_hash.eq_ignore_ascii_case(&tx_hash) {
            return Err(signer_error(format!(
                "signed hash mismatch: signer {} computed {}",
                response.tx_hash, tx_hash
            )));
        }

        Ok(SignedTransaction {
            tx_hash,
            raw: raw_bytes,
        })
    }

    async fn send_transaction(&self, signed: &SignedTransaction) -> RelayerResult<String> {
        for _ in 0..self.http_providers.len() {
            match self
                .http()
                .send_raw_transaction(Bytes::from(signed.raw.clone()))
                .await
            {
                Ok(pending) => return Ok(format!("{:?}", pending.tx_hash())),
                Err(e) => {
                    warn!(
                        "Failed to send transaction {} on chain {}: {}",
                        signed.tx_hash, self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(RelayerError::Transaction(format!(
            "all providers rejected {}",
            signed.tx_hash
        )))
    }

    async fn get_transaction(&self, tx_hash: &str) -> RelayerResult<TransactionInfo> {
        let hash: H256 = tx_hash
            .parse()
            .map_err(|_| RelayerError::Transaction(format!("invalid tx hash {}", tx_hash)))?;

        let tx = self
            .fetch_transaction(hash)
            .await?
            .ok_or_else(|| RelayerError::TransactionNotFound {
                chain_id: self.config.chain_id.clone(),
                tx_hash: tx_hash.to_string(),
            })?;

        let Some(block_number) = tx.block_number.map(|n| n.as_u64()) else {
            return Ok(TransactionInfo {
                hash: tx_hash.to_string(),
                block_number: None,
                block_time: None,
                outcome: TxOutcome::Pending,
            });
        };

        let receipt = self
            .http()
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| self.connection_error(e))?;
        let outcome = match receipt.and_then(|r| r.status).map(|s| s.as_u64()) {
            Some(1) => TxOutcome::Success,
            Some(_) => TxOutcome::Reverted,
            None => TxOutcome::Pending,
        };

        let block_time = self
            .http()
            .get_block(block_number)
            .await
            .map_err(|e| self.connection_error(e))?
            .map(|b| b.timestamp.as_u64());

        Ok(TransactionInfo {
            hash: tx_hash.to_string(),
            block_number: Some(block_number),
            block_time,
            outcome,
        })
    }

    async fn get_account_nonce(&self, address: &str, tag: BlockTag) -> RelayerResult<u64> {
        let account = parse_address(address)?;
        let block = match tag {
            BlockTag::Latest => BlockNumber::Latest,
            BlockTag::Pending => BlockNumber::Pending,
        };

        for _ in 0..self.http_providers.len() {
            match self
                .http()
                .get_transaction_count(account, Some(BlockId::Number(block)))
                .await
            {
                Ok(nonce) => return Ok(nonce.as_u64()),
                Err(e) => {
                    warn!("Failed to get nonce from chain {}: {}", self.config.chain_id, e);
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to get nonce"))
    }

    async fn latest_block_number(&self) -> RelayerResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed"))
    }

    fn increase_nonce(&self, address: &str, delta: u64) {
        self.nonces.increase(address, delta);
    }
}

fn parse_address(value: &str) -> RelayerResult<Address> {
    value
        .parse()
        .map_err(|_| RelayerError::Transaction(format!("invalid address {}", value)))
}

fn parse_uint(value: &str) -> RelayerResult<U256> {
    U256::from_dec_str(value)
        .map_err(|_| RelayerError::Transaction(format!("invalid amount {}", value)))
}

/// Router calldata paying out a cross-chain swap
fn encode_swap_in(args: &BuildTxArgs) -> RelayerResult<Vec<u8>> {
    let method = if args.for_native {
        "anySwapInAuto"
    } else if args.for_underlying {
        "anySwapInUnderlying"
    } else {
        "anySwapIn"
    };

    let swap_id: H256 = args
        .swap_id
        .parse()
        .map_err(|_| RelayerError::Transaction(format!("invalid swap id {}", args.swap_id)))?;

    let mut data = ethers::utils::id(format!("{}{}", method, SWAP_IN_ARGS)).to_vec();
    data.extend(abi::encode(&[
        Token::FixedBytes(swap_id.as_bytes().to_vec()),
        Token::Address(parse_address(&args.token)?),
        Token::Address(parse_address(&args.bind)?),
        Token::Uint(parse_uint(&args.swap_value)?),
        Token::Uint(parse_uint(&args.from_chain_id)?),
    ]));
    Ok(data)
}

//! Facilitator-side payment verification and settlement for V1 EIP-155 exact scheme.
//!
//! This module implements ERC-3009 `transferWithAuthorization` based payments,
//! including support for EOA signatures, EIP-1271 contract wallet signatures,
//! and EIP-6492 counterfactual wallet signatures.

use alloy_primitives::{Address, B256, Bytes, Signature, TxHash, U256};
use alloy_provider::bindings::IMulticall3;
use alloy_provider::{MULTICALL3_ADDRESS, MulticallItem, Provider};
use alloy_rpc_types_eth::TransactionReceipt;
use alloy_sol_types::{Eip712Domain, SolCall, SolStruct, eip712_domain, sol};
use std::collections::HashMap;
use x402_types::chain::ChainProviderOps;
use x402_types::proto;
use x402_types::proto::{PaymentVerificationError, v1};
use x402_types::scheme::{
    X402SchemeFacilitator, X402SchemeFacilitatorBuilder, X402SchemeFacilitatorError,
};
use x402_types::timestamp::UnixTimestamp;

#[cfg(feature = "telemetry")]
use tracing::Instrument;
#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::V1Eip155Exact;
use crate::chain::{Eip155ChainReference, Eip155MetaTransactionProvider, MetaTransaction};
use crate::v1_eip155_exact::types::{
    ExactEvmPayload, ExactScheme, PaymentRequirementsExtra, TransferWithAuthorization,
};
use crate::v1_eip155_exact::{PaymentRequirements, VerifyRequest};

sol!(
    #[allow(missing_docs)]
    #[allow(clippy::too_many_arguments)]
    #[derive(Debug)]
    #[sol(rpc)]
    IEIP3009,
    "abi/IEIP3009.json"
);

sol!(
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    Validator6492,
    "abi/Validator6492.json"
);

/// Address of the canonical EIP-6492 universal signature validator contract.
///
/// Deployed deterministically at the same address on every EVM chain.
pub const VALIDATOR_ADDRESS: Address = Address::new([
    0xda, 0xcd, 0x51, 0xa5, 0x48, 0x83, 0xeb, 0x67, 0xd9, 0x5f, 0xae, 0xb2, 0xbb, 0xfd, 0xc4, 0xa9,
    0xa6, 0xbd, 0x2a, 0x3b,
]);

/// Magic suffix appended to the inner signature of an EIP-6492 wrapped signature.
const EIP6492_MAGIC_SUFFIX: [u8; 32] = [
    0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92,
    0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92,
];

sol!(
    /// Solidity-compatible struct for decoding the prefix of an EIP-6492 signature.
    ///
    /// Matches the tuple `(address factory, bytes factoryCalldata, bytes innerSig)`.
    #[derive(Debug)]
    struct Sig6492 {
        address factory;
        bytes factoryCalldata;
        bytes innerSig;
    }
);

/// A resolved ERC-3009 `transferWithAuthorization` call, decoupled from wire format.
#[derive(Debug, Clone)]
pub struct ExactEvmPayment {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: B256,
    pub signature: Bytes,
}

/// A signature recovered and classified into its structural kind.
#[derive(Debug, Clone)]
pub enum StructuredSignature {
    /// A counterfactual smart-contract wallet signature per EIP-6492.
    EIP6492 {
        factory: Address,
        factory_calldata: Bytes,
        inner: Bytes,
        original: Bytes,
    },
    /// A standard externally-owned-account signature.
    EOA(Signature),
    /// A deployed smart-contract wallet signature per EIP-1271.
    EIP1271(Bytes),
}

#[derive(Debug, thiserror::Error)]
pub enum StructuredSignatureFormatError {
    #[error("invalid EIP-6492 wrapped signature: {0}")]
    InvalidEip6492Format(#[from] alloy_sol_types::Error),
}

impl StructuredSignature {
    /// Classifies `bytes` against the signer expected to have produced it over `prehash`.
    ///
    /// EIP-6492 wrapped signatures are detected first via their magic suffix. Remaining
    /// signatures are tried as raw ECDSA signatures (65-byte `r,s,v` or 64-byte ERC-2098
    /// compact form); if the recovered address matches `expected_signer` the signature is
    /// an [`StructuredSignature::EOA`], otherwise it is treated as an [`StructuredSignature::EIP1271`]
    /// signature to be validated on-chain by the token's own contract wallet logic.
    pub fn try_from_bytes(
        bytes: Bytes,
        expected_signer: Address,
        prehash: &B256,
    ) -> Result<Self, StructuredSignatureFormatError> {
        if bytes.len() >= 32 && bytes[bytes.len() - 32..] == EIP6492_MAGIC_SUFFIX {
            let body = &bytes[..bytes.len() - 32];
            let sig6492 = Sig6492::abi_decode_params(body)?;
            return Ok(StructuredSignature::EIP6492 {
                factory: sig6492.factory,
                factory_calldata: sig6492.factoryCalldata,
                inner: sig6492.innerSig,
                original: bytes,
            });
        }

        let eoa_signature = if bytes.len() == 65 {
            Signature::from_raw(&bytes).ok().map(|s| s.normalized_s())
        } else if bytes.len() == 64 {
            Some(Signature::from_erc2098(&bytes).normalized_s())
        } else {
            None
        };

        match eoa_signature {
            None => Ok(StructuredSignature::EIP1271(bytes)),
            Some(s) => {
                let is_expected_signer = s
                    .recover_address_from_prehash(prehash)
                    .ok()
                    .map(|r| r == expected_signer)
                    .unwrap_or(false);
                if is_expected_signer {
                    Ok(StructuredSignature::EOA(s))
                } else {
                    Ok(StructuredSignature::EIP1271(bytes))
                }
            }
        }
    }
}

/// Errors arising from ERC-3009 exact-payment verification and settlement.
#[derive(Debug, thiserror::Error)]
pub enum Eip155ExactError {
    #[error(transparent)]
    Transport(#[from] alloy_transport::TransportError),
    #[error(transparent)]
    PendingTransaction(#[from] alloy_provider::PendingTransactionError),
    #[error("transaction reverted: {0}")]
    TransactionReverted(TxHash),
    #[error("contract call failed: {0}")]
    ContractCall(String),
    #[error(transparent)]
    PaymentVerification(#[from] PaymentVerificationError),
}

impl From<Eip155ExactError> for X402SchemeFacilitatorError {
    fn from(value: Eip155ExactError) -> Self {
        match value {
            Eip155ExactError::Transport(_) => Self::OnchainFailure(value.to_string()),
            Eip155ExactError::PendingTransaction(_) => Self::OnchainFailure(value.to_string()),
            Eip155ExactError::TransactionReverted(_) => Self::OnchainFailure(value.to_string()),
            Eip155ExactError::ContractCall(_) => Self::OnchainFailure(value.to_string()),
            Eip155ExactError::PaymentVerification(e) => Self::PaymentVerification(e),
        }
    }
}

impl From<StructuredSignatureFormatError> for Eip155ExactError {
    fn from(value: StructuredSignatureFormatError) -> Self {
        Eip155ExactError::PaymentVerification(PaymentVerificationError::InvalidSignature(
            value.to_string(),
        ))
    }
}

impl From<crate::chain::MetaTransactionSendError> for Eip155ExactError {
    fn from(value: crate::chain::MetaTransactionSendError) -> Self {
        match value {
            crate::chain::MetaTransactionSendError::Transport(e) => Eip155ExactError::Transport(e),
            crate::chain::MetaTransactionSendError::PendingTransaction(e) => {
                Eip155ExactError::PendingTransaction(e)
            }
            crate::chain::MetaTransactionSendError::Custom(e) => Eip155ExactError::ContractCall(e),
        }
    }
}

impl From<alloy_provider::MulticallError> for Eip155ExactError {
    fn from(e: alloy_provider::MulticallError) -> Self {
        match e {
            alloy_provider::MulticallError::TransportError(transport_error) => {
                Self::Transport(transport_error)
            }
            other => Self::PaymentVerification(PaymentVerificationError::TransactionSimulation(
                other.to_string(),
            )),
        }
    }
}

impl From<alloy_contract::Error> for Eip155ExactError {
    fn from(e: alloy_contract::Error) -> Self {
        match e {
            alloy_contract::Error::TransportError(e) => Self::Transport(e),
            alloy_contract::Error::PendingTransactionError(e) => Self::PendingTransaction(e),
            other => Self::ContractCall(other.to_string()),
        }
    }
}

/// Checks that `valid_after <= now < valid_before`.
pub fn assert_time(
    valid_after: UnixTimestamp,
    valid_before: UnixTimestamp,
) -> Result<(), PaymentVerificationError> {
    let now = UnixTimestamp::now();
    if now < valid_after {
        return Err(PaymentVerificationError::Early);
    }
    if now >= valid_before {
        return Err(PaymentVerificationError::Expired);
    }
    Ok(())
}

/// Checks that the authorized `sent` value is not less than what the requirements demand.
pub fn assert_enough_value(
    sent: &U256,
    max_amount_required: &U256,
) -> Result<(), PaymentVerificationError> {
    if sent < max_amount_required {
        Err(PaymentVerificationError::InvalidExactEvmAuthorizationValue {
            required: max_amount_required.to_string(),
            sent: sent.to_string(),
        })
    } else {
        Ok(())
    }
}

/// Checks the payer's on-chain balance is sufficient to cover `amount`.
pub async fn assert_enough_balance<P: Provider>(
    contract: &IEIP3009::IEIP3009Instance<P>,
    payer: &Address,
    amount: U256,
) -> Result<(), Eip155ExactError> {
    let balance_fut = contract.balanceOf(*payer).call().into_future();
    #[cfg(feature = "telemetry")]
    let balance = balance_fut
        .instrument(tracing::info_span!(
            "fetch_balance",
            token_contract = %contract.address(),
            sender = %payer,
            otel.kind = "client"
        ))
        .await?;
    #[cfg(not(feature = "telemetry"))]
    let balance = balance_fut.await?;
    if balance < amount {
        return Err(PaymentVerificationError::InsufficientFunds {
            available: balance.to_string(),
            required: amount.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Constructs the EIP-712 domain for the token, falling back to on-chain `name()`/`version()`
/// calls when the payment requirements don't specify them explicitly via `extra`.
pub async fn assert_domain<P: Provider>(
    chain: &Eip155ChainReference,
    contract: &IEIP3009::IEIP3009Instance<P>,
    asset_address: &Address,
    extra: &Option<PaymentRequirementsExtra>,
) -> Result<Eip712Domain, Eip155ExactError> {
    let (name, version) = match extra {
        Some(extra) => (extra.name.clone(), extra.version.clone()),
        None => {
            let name_fut = contract.name().call().into_future();
            let version_fut = contract.version().call().into_future();
            #[cfg(feature = "telemetry")]
            let (name, version) = tokio::try_join!(
                name_fut.instrument(tracing::info_span!("fetch_name")),
                version_fut.instrument(tracing::info_span!("fetch_version"))
            )?;
            #[cfg(not(feature = "telemetry"))]
            let (name, version) = tokio::try_join!(name_fut, version_fut)?;
            (name, version)
        }
    };
    Ok(eip712_domain! {
        name: name,
        version: version,
        chain_id: chain.inner(),
        verifying_contract: *asset_address,
    })
}

/// Checks whether an address already has contract code deployed.
pub async fn is_contract_deployed<P: Provider>(
    provider: P,
    address: &Address,
) -> Result<bool, alloy_transport::TransportError> {
    let code = provider.get_code_at(*address).await?;
    Ok(!code.is_empty())
}

/// Runs all preconditions needed for a successful V1 exact EVM payment.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err))]
pub async fn assert_valid_payment<P: Provider>(
    provider: P,
    chain: &Eip155ChainReference,
    accepted: &PaymentRequirements,
    payload: &ExactEvmPayload,
) -> Result<(IEIP3009::IEIP3009Instance<P>, ExactEvmPayment, Eip712Domain), Eip155ExactError> {
    let authorization = &payload.authorization;
    if authorization.to != accepted.pay_to {
        return Err(PaymentVerificationError::RecipientMismatch {
            expected: accepted.pay_to.to_string(),
            actual: authorization.to.to_string(),
        }
        .into());
    }
    let valid_after = authorization.valid_after;
    let valid_before = authorization.valid_before;
    assert_time(valid_after, valid_before)?;

    let asset_address = accepted.asset;
    let contract = IEIP3009::new(asset_address, provider);

    let amount_required = accepted.max_amount_required;
    assert_enough_value(&authorization.value, &amount_required)?;

    let domain = assert_domain(chain, &contract, &asset_address, &accepted.extra).await?;

    assert_enough_balance(&contract, &authorization.from, amount_required).await?;

    let payment = ExactEvmPayment {
        from: authorization.from,
        to: authorization.to,
        value: authorization.value,
        valid_after: authorization.valid_after,
        valid_before: authorization.valid_before,
        nonce: authorization.nonce,
        signature: payload.signature.clone(),
    };

    Ok((contract, payment, domain))
}

fn typed_authorization(payment: &ExactEvmPayment) -> TransferWithAuthorization {
    TransferWithAuthorization {
        from: payment.from,
        to: payment.to,
        value: payment.value,
        validAfter: U256::from(payment.valid_after.as_secs()),
        validBefore: U256::from(payment.valid_before.as_secs()),
        nonce: payment.nonce,
    }
}

/// Extracts the transaction hash from a receipt, failing if the transaction reverted.
pub fn tx_hash_from_receipt(receipt: &TransactionReceipt) -> Result<TxHash, Eip155ExactError> {
    if !receipt.status() {
        return Err(Eip155ExactError::TransactionReverted(
            receipt.transaction_hash,
        ));
    }
    Ok(receipt.transaction_hash)
}

/// Verifies a resolved payment by simulating its settlement, without submitting a transaction.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err))]
pub async fn verify_payment<P: Provider>(
    provider: P,
    contract: &IEIP3009::IEIP3009Instance<P>,
    payment: &ExactEvmPayment,
    eip712_domain: &Eip712Domain,
) -> Result<Address, Eip155ExactError> {
    let typed = typed_authorization(payment);
    let eip712_hash = typed.eip712_signing_hash(eip712_domain);
    let structured_signature =
        StructuredSignature::try_from_bytes(payment.signature.clone(), payment.from, &eip712_hash)?;

    match structured_signature {
        StructuredSignature::EIP6492 {
            original, inner, ..
        } => {
            let validator6492 = Validator6492::new(VALIDATOR_ADDRESS, &provider);
            let is_valid_signature_call =
                validator6492.isValidSigWithSideEffects(payment.from, eip712_hash, original);
            let transfer_call = contract.transferWithAuthorization_0(
                payment.from,
                payment.to,
                payment.value,
                U256::from(payment.valid_after.as_secs()),
                U256::from(payment.valid_before.as_secs()),
                payment.nonce,
                inner,
            );
            let aggregate3 = provider
                .multicall()
                .add(is_valid_signature_call)
                .add(transfer_call);
            let aggregate3_call = aggregate3.aggregate3();
            #[cfg(feature = "telemetry")]
            let (is_valid_result, transfer_result) = aggregate3_call
                .instrument(tracing::info_span!("multi_call_verify_eip3009", otel.kind = "client"))
                .await?;
            #[cfg(not(feature = "telemetry"))]
            let (is_valid_result, transfer_result) = aggregate3_call.await?;
            let is_valid = is_valid_result
                .map_err(|e| PaymentVerificationError::InvalidSignature(e.to_string()))?;
            if !is_valid {
                return Err(PaymentVerificationError::InvalidSignature(
                    "Chain reported signature to be invalid".to_string(),
                )
                .into());
            }
            transfer_result
                .map_err(|e| PaymentVerificationError::TransactionSimulation(e.to_string()))?;
            Ok(payment.from)
        }
        StructuredSignature::EIP1271(signature) => {
            let transfer_call = contract.transferWithAuthorization_0(
                payment.from,
                payment.to,
                payment.value,
                U256::from(payment.valid_after.as_secs()),
                U256::from(payment.valid_before.as_secs()),
                payment.nonce,
                signature,
            );
            let fut = transfer_call.call().into_future();
            #[cfg(feature = "telemetry")]
            fut.instrument(tracing::info_span!("call_verify_eip3009.EIP1271", otel.kind = "client"))
                .await
                .map_err(|e| PaymentVerificationError::TransactionSimulation(e.to_string()))?;
            #[cfg(not(feature = "telemetry"))]
            fut.await
                .map_err(|e| PaymentVerificationError::TransactionSimulation(e.to_string()))?;
            Ok(payment.from)
        }
        StructuredSignature::EOA(signature) => {
            let r = B256::from(signature.r());
            let s = B256::from(signature.s());
            let v = 27 + (signature.v() as u8);
            let transfer_call = contract.transferWithAuthorization_1(
                payment.from,
                payment.to,
                payment.value,
                U256::from(payment.valid_after.as_secs()),
                U256::from(payment.valid_before.as_secs()),
                payment.nonce,
                v,
                r,
                s,
            );
            let fut = transfer_call.call().into_future();
            #[cfg(feature = "telemetry")]
            fut.instrument(tracing::info_span!("call_verify_eip3009.EOA", otel.kind = "client"))
                .await
                .map_err(|e| PaymentVerificationError::TransactionSimulation(e.to_string()))?;
            #[cfg(not(feature = "telemetry"))]
            fut.await
                .map_err(|e| PaymentVerificationError::TransactionSimulation(e.to_string()))?;
            Ok(payment.from)
        }
    }
}

/// Settles a resolved payment by submitting the `transferWithAuthorization` transaction.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err))]
pub async fn settle_payment<P, E>(
    provider: &P,
    contract: &IEIP3009::IEIP3009Instance<P::Inner>,
    payment: &ExactEvmPayment,
    eip712_domain: &Eip712Domain,
) -> Result<TxHash, Eip155ExactError>
where
    P: Eip155MetaTransactionProvider<Error = E>,
    P::Inner: Provider,
    Eip155ExactError: From<E>,
{
    let typed = typed_authorization(payment);
    let eip712_hash = typed.eip712_signing_hash(eip712_domain);
    let structured_signature =
        StructuredSignature::try_from_bytes(payment.signature.clone(), payment.from, &eip712_hash)?;

    let receipt: TransactionReceipt = match structured_signature {
        StructuredSignature::EIP6492 {
            factory,
            factory_calldata,
            inner,
            ..
        } => {
            let deployed = is_contract_deployed(provider.inner(), &payment.from).await?;
            let transfer_call = contract.transferWithAuthorization_0(
                payment.from,
                payment.to,
                payment.value,
                U256::from(payment.valid_after.as_secs()),
                U256::from(payment.valid_before.as_secs()),
                payment.nonce,
                inner,
            );
            if deployed {
                let tx_fut = Eip155MetaTransactionProvider::send_transaction(
                    provider,
                    MetaTransaction {
                        to: transfer_call.target(),
                        calldata: transfer_call.calldata().clone(),
                        confirmations: 1,
                    },
                );
                #[cfg(feature = "telemetry")]
                let receipt = tx_fut
                    .instrument(tracing::info_span!(
                        "settle_eip3009.EIP6492.deployed",
                        from = %payment.from,
                        to = %payment.to,
                        otel.kind = "client"
                    ))
                    .await?;
                #[cfg(not(feature = "telemetry"))]
                let receipt = tx_fut.await?;
                receipt
            } else {
                let deployment_call = IMulticall3::Call3 {
                    allowFailure: true,
                    target: factory,
                    callData: factory_calldata,
                };
                let transfer_with_authorization_call = IMulticall3::Call3 {
                    allowFailure: false,
                    target: transfer_call.target(),
                    callData: transfer_call.calldata().clone(),
                };
                let aggregate_call = IMulticall3::aggregate3Call {
                    calls: vec![deployment_call, transfer_with_authorization_call],
                };
                let tx_fut = Eip155MetaTransactionProvider::send_transaction(
                    provider,
                    MetaTransaction {
                        to: MULTICALL3_ADDRESS,
                        calldata: aggregate_call.abi_encode().into(),
                        confirmations: 1,
                    },
                );
                #[cfg(feature = "telemetry")]
                let receipt = tx_fut
                    .instrument(tracing::info_span!(
                        "settle_eip3009.EIP6492.counterfactual",
                        from = %payment.from,
                        to = %payment.to,
                        otel.kind = "client"
                    ))
                    .await?;
                #[cfg(not(feature = "telemetry"))]
                let receipt = tx_fut.await?;
                receipt
            }
        }
        StructuredSignature::EIP1271(signature) => {
            let transfer_call = contract.transferWithAuthorization_0(
                payment.from,
                payment.to,
                payment.value,
                U256::from(payment.valid_after.as_secs()),
                U256::from(payment.valid_before.as_secs()),
                payment.nonce,
                signature,
            );
            let tx_fut = Eip155MetaTransactionProvider::send_transaction(
                provider,
                MetaTransaction {
                    to: transfer_call.target(),
                    calldata: transfer_call.calldata().clone(),
                    confirmations: 1,
                },
            );
            #[cfg(feature = "telemetry")]
            let receipt = tx_fut
                .instrument(tracing::info_span!(
                    "settle_eip3009.EIP1271",
                    from = %payment.from,
                    to = %payment.to,
                    otel.kind = "client"
                ))
                .await?;
            #[cfg(not(feature = "telemetry"))]
            let receipt = tx_fut.await?;
            receipt
        }
        StructuredSignature::EOA(signature) => {
            let r = B256::from(signature.r());
            let s = B256::from(signature.s());
            let v = 27 + (signature.v() as u8);
            let transfer_call = contract.transferWithAuthorization_1(
                payment.from,
                payment.to,
                payment.value,
                U256::from(payment.valid_after.as_secs()),
                U256::from(payment.valid_before.as_secs()),
                payment.nonce,
                v,
                r,
                s,
            );
            let tx_fut = Eip155MetaTransactionProvider::send_transaction(
                provider,
                MetaTransaction {
                    to: transfer_call.target(),
                    calldata: transfer_call.calldata().clone(),
                    confirmations: 1,
                },
            );
            #[cfg(feature = "telemetry")]
            let receipt = tx_fut
                .instrument(tracing::info_span!(
                    "settle_eip3009.EOA",
                    from = %payment.from,
                    to = %payment.to,
                    otel.kind = "client"
                ))
                .await?;
            #[cfg(not(feature = "telemetry"))]
            let receipt = tx_fut.await?;
            receipt
        }
    };
    tx_hash_from_receipt(&receipt)
}

impl<P> X402SchemeFacilitatorBuilder<P> for V1Eip155Exact
where
    P: Eip155MetaTransactionProvider + ChainProviderOps + Send + Sync + 'static,
    Eip155ExactError: From<P::Error>,
{
    fn build(
        &self,
        provider: P,
        _config: Option<serde_json::Value>,
    ) -> Result<Box<dyn X402SchemeFacilitator>, Box<dyn std::error::Error>> {
        Ok(Box::new(V1Eip155ExactFacilitator::new(provider)))
    }
}

/// Facilitator for V1 EIP-155 exact scheme payments.
pub struct V1Eip155ExactFacilitator<P> {
    provider: P,
}

impl<P> V1Eip155ExactFacilitator<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait::async_trait]
impl<P> X402SchemeFacilitator for V1Eip155ExactFacilitator<P>
where
    P: Eip155MetaTransactionProvider + ChainProviderOps + Send + Sync,
    P::Inner: Provider,
    Eip155ExactError: From<P::Error>,
{
    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<proto::VerifyResponse, X402SchemeFacilitatorError> {
        let request = VerifyRequest::from_proto(request.clone())?;
        let accepted = &request.payment_requirements;
        if accepted.scheme != ExactScheme {
            return Err(PaymentVerificationError::UnsupportedScheme.into());
        }
        let expected_network = self
            .provider
            .chain_id()
            .as_network_name()
            .map(|n| n.to_string())
            .unwrap_or_else(|| self.provider.chain_id().to_string());
        if request.payment_payload.network != expected_network {
            return Err(PaymentVerificationError::ChainIdMismatch.into());
        }

        let (contract, payment, eip712_domain) = assert_valid_payment(
            self.provider.inner(),
            self.provider.chain(),
            accepted,
            &request.payment_payload.payload,
        )
        .await?;

        let payer = verify_payment(self.provider.inner(), &contract, &payment, &eip712_domain)
            .await?;
        Ok(v1::VerifyResponse::valid(payer.to_string()).into())
    }

    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<proto::SettleResponse, X402SchemeFacilitatorError> {
        let request = VerifyRequest::from_proto(request.clone())?;
        let accepted = &request.payment_requirements;
        if accepted.scheme != ExactScheme {
            return Err(PaymentVerificationError::UnsupportedScheme.into());
        }

        let (contract, payment, eip712_domain) = assert_valid_payment(
            self.provider.inner(),
            self.provider.chain(),
            accepted,
            &request.payment_payload.payload,
        )
        .await?;

        let tx_hash = settle_payment(&self.provider, &contract, &payment, &eip712_domain).await?;

        Ok(v1::SettleResponse::Success {
            payer: payment.from.to_string(),
            transaction: tx_hash.to_string(),
            network: request.payment_payload.network.clone(),
            extensions: Default::default(),
        }
        .into())
    }

    async fn supported(&self) -> Result<proto::SupportedResponse, X402SchemeFacilitatorError> {
        let chain_id = self.provider.chain_id();
        let network = chain_id
            .as_network_name()
            .map(|n| n.to_string())
            .unwrap_or_else(|| chain_id.to_string());
        let kinds = vec![proto::SupportedPaymentKind {
            x402_version: v1::X402Version1::VALUE,
            scheme: ExactScheme.to_string(),
            network,
            extra: None,
        }];
        let signers = {
            let mut signers = HashMap::with_capacity(1);
            signers.insert(chain_id, self.provider.signer_addresses());
            signers
        };
        Ok(proto::SupportedResponse {
            kinds,
            extensions: Vec::new(),
            signers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_signer::Signer;
    use alloy_signer_local::PrivateKeySigner;

    #[test]
    fn assert_time_rejects_early_and_expired_windows() {
        let now = UnixTimestamp::now();
        assert!(matches!(
            assert_time(now + 60, now + 120),
            Err(PaymentVerificationError::Early)
        ));
        assert!(matches!(
            assert_time(UnixTimestamp::from_secs(0), now),
            Err(PaymentVerificationError::Expired)
        ));
    }

    #[test]
    fn assert_time_accepts_window_containing_now() {
        let now = UnixTimestamp::now();
        assert!(assert_time(UnixTimestamp::from_secs(0), now + 3600).is_ok());
    }

    #[test]
    fn assert_enough_value_requires_sent_to_cover_requirement() {
        assert!(assert_enough_value(&U256::from(100u64), &U256::from(100u64)).is_ok());
        assert!(assert_enough_value(&U256::from(99u64), &U256::from(100u64)).is_err());
    }

    #[tokio::test]
    async fn structured_signature_classifies_matching_eoa_signature() {
        let signer = PrivateKeySigner::random();
        let prehash = B256::from([7u8; 32]);
        let signature = signer.sign_hash(&prehash).await.unwrap();
        let bytes = Bytes::from(signature.as_bytes().to_vec());

        let classified =
            StructuredSignature::try_from_bytes(bytes, signer.address(), &prehash).unwrap();
        assert!(matches!(classified, StructuredSignature::EOA(_)));
    }

    #[tokio::test]
    async fn structured_signature_falls_back_to_eip1271_on_signer_mismatch() {
        let signer = PrivateKeySigner::random();
        let other = PrivateKeySigner::random();
        let prehash = B256::from([7u8; 32]);
        let signature = signer.sign_hash(&prehash).await.unwrap();
        let bytes = Bytes::from(signature.as_bytes().to_vec());

        let classified =
            StructuredSignature::try_from_bytes(bytes, other.address(), &prehash).unwrap();
        assert!(matches!(classified, StructuredSignature::EIP1271(_)));
    }
}

//! Facilitator-side verification and settlement for the ERC-2612 `permit` sub-scheme.
//!
//! Unlike EIP-3009 and Permit2, a `Permit` message only grants an allowance to
//! `spender` — it does not carry a recipient. The facilitator's own signer
//! address is always the `spender`; once the allowance lands on-chain the
//! facilitator executes `transferFrom(owner, accepted.pay_to, value)` to move
//! the funds. Both calls are run atomically through Multicall3's `aggregate3`
//! so verification simulates the whole sequence and settlement submits it as
//! a single transaction.

use alloy_primitives::{Address, B256, Bytes, Signature, TxHash, U256};
use alloy_provider::bindings::IMulticall3;
use alloy_provider::{MULTICALL3_ADDRESS, MulticallItem, Provider};
use alloy_rpc_types_eth::TransactionReceipt;
use alloy_sol_types::{Eip712Domain, SolCall, SolStruct, eip712_domain, sol};
use x402_types::chain::{ChainId, ChainProviderOps};
use x402_types::proto::{PaymentVerificationError, v2};
use x402_types::scheme::X402SchemeFacilitatorError;
use x402_types::timestamp::UnixTimestamp;

#[cfg(feature = "telemetry")]
use tracing::Instrument;
#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::chain::{
    AssetTransferMethod, Eip155ChainReference, Eip155MetaTransactionProvider, MetaTransaction,
};
use crate::v1_eip155_exact::{Eip155ExactError, tx_hash_from_receipt};
use crate::v2_eip155_exact::eip3009::assert_requirements_match;
use crate::v2_eip155_exact::types::{Permit, PermitPaymentPayload, PermitPaymentRequirements};

sol!(
    #[allow(missing_docs)]
    #[allow(clippy::too_many_arguments)]
    #[derive(Debug)]
    #[sol(rpc)]
    IERC20Permit,
    "abi/IERC20Permit.json"
);

/// A resolved ERC-2612 `permit` authorization, decoupled from wire format.
#[derive(Debug, Clone)]
pub struct ResolvedPermit {
    pub owner: Address,
    pub spender: Address,
    pub value: U256,
    pub nonce: U256,
    pub deadline: UnixTimestamp,
    pub signature: Bytes,
}

#[cfg_attr(feature = "telemetry", instrument(skip_all, err))]
pub async fn verify_permit_payment<P: Eip155MetaTransactionProvider + ChainProviderOps>(
    provider: &P,
    payment_payload: &PermitPaymentPayload,
    payment_requirements: &PermitPaymentRequirements,
) -> Result<v2::VerifyResponse, X402SchemeFacilitatorError> {
    let accepted = &payment_payload.accepted;
    assert_requirements_match(accepted, payment_requirements)?;
    let (contract, permit, _domain) = assert_valid_permit(
        provider.inner(),
        provider.chain(),
        &provider.signer_addresses(),
        accepted,
        &payment_payload.payload,
    )
    .await?;

    let pay_to: Address = accepted.pay_to.into();
    let payer = verify_permit(provider.inner(), &contract, &permit, pay_to).await?;
    Ok(v2::VerifyResponse::valid(payer.to_string()))
}

#[cfg_attr(feature = "telemetry", instrument(skip_all, err))]
pub async fn settle_permit_payment<P>(
    provider: &P,
    payment_payload: &PermitPaymentPayload,
    payment_requirements: &PermitPaymentRequirements,
) -> Result<v2::SettleResponse, X402SchemeFacilitatorError>
where
    P: Eip155MetaTransactionProvider + ChainProviderOps,
    Eip155ExactError: From<P::Error>,
{
    let accepted = &payment_payload.accepted;
    assert_requirements_match(accepted, payment_requirements)?;
    let (contract, permit, _domain) = assert_valid_permit(
        provider.inner(),
        provider.chain(),
        &provider.signer_addresses(),
        accepted,
        &payment_payload.payload,
    )
    .await?;

    let pay_to: Address = accepted.pay_to.into();
    let tx_hash = settle_permit(provider, &contract, &permit, pay_to).await?;

    Ok(v2::SettleResponse::Success {
        payer: permit.owner.to_string(),
        transaction: tx_hash.to_string(),
        network: accepted.network.to_string(),
        extensions: Default::default(),
    })
}

/// Runs all preconditions needed for a successful `permit` payment:
/// - `spender` must be one of the facilitator's own signers (never a third party).
/// - Valid time window (permit has no `validAfter`, only `deadline`).
/// - Correct EIP-712 domain construction.
/// - Signature recovers to `owner`.
/// - Sufficient allowance value and on-chain balance.
/// - The on-chain `nonces(owner)` must match the signed nonce.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err))]
pub async fn assert_valid_permit<P: Provider>(
    provider: P,
    chain: &Eip155ChainReference,
    facilitator_signers: &[String],
    accepted: &PermitPaymentRequirements,
    payload: &crate::v2_eip155_exact::types::PermitPayload,
) -> Result<(IERC20Permit::IERC20PermitInstance<P>, ResolvedPermit, Eip712Domain), Eip155ExactError>
{
    let chain_id: ChainId = chain.into();
    if accepted.network != chain_id {
        return Err(PaymentVerificationError::ChainIdMismatch.into());
    }

    let authorization = &payload.authorization;
    let is_facilitator_spender = facilitator_signers
        .iter()
        .any(|s| s.eq_ignore_ascii_case(&authorization.spender.to_string()));
    if !is_facilitator_spender {
        return Err(PaymentVerificationError::RecipientMismatch {
            expected: facilitator_signers.join(","),
            actual: authorization.spender.to_string(),
        }
        .into());
    }

    assert_permit_time(authorization.deadline)?;

    let asset_address = accepted.asset;
    let contract = IERC20Permit::new(asset_address.into(), provider);

    let amount_required = accepted.amount;
    if authorization.value < amount_required {
        return Err(PaymentVerificationError::InvalidPaymentAmount {
            required: amount_required.to_string(),
            sent: authorization.value.to_string(),
        }
        .into());
    }

    let (name, version) = match &accepted.extra {
        AssetTransferMethod::Permit { name, version } => (name.clone(), version.clone()),
        AssetTransferMethod::Eip3009 { .. } | AssetTransferMethod::Permit2 => {
            return Err(PaymentVerificationError::InvalidPaymentRequirements(
                "permit sub-scheme requires extra.name/extra.version".to_string(),
            )
            .into());
        }
    };
    let domain = eip712_domain! {
        name: name,
        version: version,
        chain_id: chain.inner(),
        verifying_contract: Address::from(asset_address),
    };

    let permit = ResolvedPermit {
        owner: authorization.owner,
        spender: authorization.spender,
        value: authorization.value,
        nonce: authorization.nonce,
        deadline: authorization.deadline,
        signature: payload.signature.clone(),
    };

    let typed = typed_permit(&permit);
    let eip712_hash = typed.eip712_signing_hash(&domain);
    let signature = Signature::from_raw(&permit.signature)
        .map_err(|e| PaymentVerificationError::InvalidSignature(e.to_string()))?
        .normalized_s();
    let recovered = signature
        .recover_address_from_prehash(&eip712_hash)
        .map_err(|e| PaymentVerificationError::InvalidSignature(e.to_string()))?;
    if recovered != permit.owner {
        return Err(PaymentVerificationError::InvalidSignature(
            "permit signature does not recover to owner".to_string(),
        )
        .into());
    }

    let on_chain_nonce_fut = contract.nonces(permit.owner).call().into_future();
    let balance_fut = contract.balanceOf(permit.owner).call().into_future();
    #[cfg(feature = "telemetry")]
    let (on_chain_nonce, balance) = tokio::try_join!(
        on_chain_nonce_fut.instrument(tracing::info_span!("fetch_permit_nonce")),
        balance_fut.instrument(tracing::info_span!("fetch_balance"))
    )?;
    #[cfg(not(feature = "telemetry"))]
    let (on_chain_nonce, balance) = tokio::try_join!(on_chain_nonce_fut, balance_fut)?;

    if on_chain_nonce != permit.nonce {
        return Err(PaymentVerificationError::InvalidTransactionState(format!(
            "expected nonce {}, token reports {}",
            permit.nonce, on_chain_nonce
        ))
        .into());
    }
    if balance < amount_required {
        return Err(PaymentVerificationError::InsufficientFunds {
            available: balance.to_string(),
            required: amount_required.to_string(),
        }
        .into());
    }

    Ok((contract, permit, domain))
}

/// Checks that `now < deadline`. ERC-2612 has no `validAfter`, so only the
/// upper bound of the EIP-3009 time window applies here.
fn assert_permit_time(deadline: UnixTimestamp) -> Result<(), PaymentVerificationError> {
    if UnixTimestamp::now() >= deadline {
        return Err(PaymentVerificationError::Expired);
    }
    Ok(())
}

fn typed_permit(permit: &ResolvedPermit) -> Permit {
    Permit {
        owner: permit.owner,
        spender: permit.spender,
        value: permit.value,
        nonce: permit.nonce,
        deadline: U256::from(permit.deadline.as_secs()),
    }
}

fn split_signature(signature: &Bytes) -> Result<(u8, B256, B256), Eip155ExactError> {
    let sig = if signature.len() == 65 {
        Signature::from_raw(signature)
            .map_err(|e| PaymentVerificationError::InvalidSignature(e.to_string()))?
    } else if signature.len() == 64 {
        Signature::from_erc2098(signature)
    } else {
        return Err(PaymentVerificationError::InvalidSignature(
            "permit signature must be 64 or 65 bytes".to_string(),
        )
        .into());
    };
    let sig = sig.normalized_s();
    let r = B256::from(sig.r());
    let s = B256::from(sig.s());
    let v = 27 + (sig.v() as u8);
    Ok((v, r, s))
}

/// Verifies a resolved permit by simulating `permit` + `transferFrom` atomically
/// via Multicall3's `aggregate3`, without submitting a transaction.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err))]
pub async fn verify_permit<P: Provider>(
    provider: P,
    contract: &IERC20Permit::IERC20PermitInstance<P>,
    permit: &ResolvedPermit,
    pay_to: Address,
) -> Result<Address, Eip155ExactError> {
    let (v, r, s) = split_signature(&permit.signature)?;
    let permit_call = contract.permit(
        permit.owner,
        permit.spender,
        permit.value,
        U256::from(permit.deadline.as_secs()),
        v,
        r,
        s,
    );
    let transfer_call = contract.transferFrom(permit.owner, pay_to, permit.value);
    let aggregate3 = provider.multicall().add(permit_call).add(transfer_call);
    let aggregate3_call = aggregate3.aggregate3();
    #[cfg(feature = "telemetry")]
    let (permit_result, transfer_result) = aggregate3_call
        .instrument(tracing::info_span!("multi_call_verify_permit", otel.kind = "client"))
        .await?;
    #[cfg(not(feature = "telemetry"))]
    let (permit_result, transfer_result) = aggregate3_call.await?;
    permit_result.map_err(|e| PaymentVerificationError::TransactionSimulation(e.to_string()))?;
    transfer_result.map_err(|e| PaymentVerificationError::TransactionSimulation(e.to_string()))?;
    Ok(permit.owner)
}

/// Submits `permit(...)` and `transferFrom(owner, pay_to, value)` atomically
/// as a single Multicall3 `aggregate3` transaction.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err))]
pub async fn settle_permit<P>(
    provider: &P,
    contract: &IERC20Permit::IERC20PermitInstance<P::Inner>,
    permit: &ResolvedPermit,
    pay_to: Address,
) -> Result<TxHash, Eip155ExactError>
where
    P: Eip155MetaTransactionProvider,
    P::Inner: Provider,
    Eip155ExactError: From<P::Error>,
{
    let (v, r, s) = split_signature(&permit.signature)?;
    let permit_call = contract.permit(
        permit.owner,
        permit.spender,
        permit.value,
        U256::from(permit.deadline.as_secs()),
        v,
        r,
        s,
    );
    let transfer_call = contract.transferFrom(permit.owner, pay_to, permit.value);
    let aggregate_call = IMulticall3::aggregate3Call {
        calls: vec![
            IMulticall3::Call3 {
                allowFailure: false,
                target: permit_call.target(),
                callData: permit_call.calldata().clone(),
            },
            IMulticall3::Call3 {
                allowFailure: false,
                target: transfer_call.target(),
                callData: transfer_call.calldata().clone(),
            },
        ],
    };
    let tx = MetaTransaction {
        to: MULTICALL3_ADDRESS,
        calldata: aggregate_call.abi_encode().into(),
        confirmations: 1,
    };
    let tx_fut = Eip155MetaTransactionProvider::send_transaction(provider, tx);
    #[cfg(feature = "telemetry")]
    let receipt: TransactionReceipt = tx_fut
        .instrument(tracing::info_span!(
            "settle_permit",
            owner = %permit.owner,
            spender = %permit.spender,
            to = %pay_to,
            value = %permit.value,
            otel.kind = "client"
        ))
        .await?;
    #[cfg(not(feature = "telemetry"))]
    let receipt: TransactionReceipt = tx_fut.await?;

    tx_hash_from_receipt(&receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_signer::Signer;
    use alloy_signer_local::PrivateKeySigner;

    #[test]
    fn assert_permit_time_rejects_past_deadline() {
        let now = UnixTimestamp::now();
        assert!(matches!(
            assert_permit_time(UnixTimestamp::from_secs(0)),
            Err(PaymentVerificationError::Expired)
        ));
        assert!(assert_permit_time(now + 3600).is_ok());
    }

    #[test]
    fn typed_permit_carries_deadline_as_seconds() {
        let permit = ResolvedPermit {
            owner: Address::ZERO,
            spender: Address::ZERO,
            value: U256::from(42u64),
            nonce: U256::from(7u64),
            deadline: UnixTimestamp::from_secs(1_700_000_000),
            signature: Bytes::default(),
        };
        let typed = typed_permit(&permit);
        assert_eq!(typed.value, U256::from(42u64));
        assert_eq!(typed.nonce, U256::from(7u64));
        assert_eq!(typed.deadline, U256::from(1_700_000_000u64));
    }

    #[tokio::test]
    async fn split_signature_roundtrips_65_byte_eoa_signature() {
        let signer = PrivateKeySigner::random();
        let hash = B256::from([3u8; 32]);
        let signature = signer.sign_hash(&hash).await.unwrap();
        let bytes = Bytes::from(signature.as_bytes().to_vec());

        let (v, r, s) = split_signature(&bytes).unwrap();
        assert!(v == 27 || v == 28);

        let recovered = Signature::from_raw(&bytes)
            .unwrap()
            .normalized_s()
            .recover_address_from_prehash(&hash)
            .unwrap();
        assert_eq!(recovered, signer.address());
        // r/s survive the split unchanged, the recovery just re-derives the same values.
        assert_eq!(r, B256::from(signature.r()));
        assert_eq!(s, B256::from(signature.s()));
    }

    #[test]
    fn split_signature_rejects_wrong_length() {
        let bytes = Bytes::from(vec![0u8; 10]);
        assert!(split_signature(&bytes).is_err());
    }
}

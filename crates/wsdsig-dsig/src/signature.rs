#![forbid(unsafe_code)]

//! `<ds:Signature>` and the sign/verify state machine.

use log::debug;
use wsdsig_core::{algorithm, ns, Error, Result};
use wsdsig_crypto::{constant_time_eq, HashName, SecurityKey};
use wsdsig_transforms::TransformFactory;
use wsdsig_xml::content::{
    encode_base64, is_start_element, read_element_content_as_base64, read_end_element,
    read_start_element, skip_element, skip_misc,
};
use wsdsig_xml::{TokenStream, XmlEvent, XmlRead, XmlSink};

use crate::context::DsigContext;
use crate::reference::Reference;
use crate::signed_info::SignedInfo;

/// Where a [`Signature`] is in its lifecycle.
///
/// Signing goes `Unsigned → Signed`; verification goes
/// `Parsed → PartiallyVerified → FullyVerified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureState {
    Unsigned,
    Signed,
    Parsed,
    /// The signature value checked out; references are being matched.
    PartiallyVerified,
    FullyVerified,
}

#[derive(Debug)]
pub struct Signature {
    id: Option<String>,
    signed_info: SignedInfo,
    signature_value: Option<Vec<u8>>,
    signature_value_id: Option<String>,
    key_info: Option<TokenStream>,
    state: SignatureState,
}

impl Signature {
    pub fn new(signed_info: SignedInfo) -> Self {
        Self {
            id: None,
            signed_info,
            signature_value: None,
            signature_value_id: None,
            key_info: None,
            state: SignatureState::Unsigned,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_signature_value_id(mut self, id: impl Into<String>) -> Self {
        self.signature_value_id = Some(id.into());
        self
    }

    /// Attaches a recorded `<ds:KeyInfo>` element, written as-is.
    pub fn with_key_info(mut self, key_info: TokenStream) -> Self {
        self.key_info = Some(key_info);
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn state(&self) -> SignatureState {
        self.state
    }

    pub fn signed_info(&self) -> &SignedInfo {
        &self.signed_info
    }

    /// Mutable access before signing.
    pub fn signed_info_mut(&mut self) -> Result<&mut SignedInfo> {
        self.expect_state(SignatureState::Unsigned, "modify")?;
        Ok(&mut self.signed_info)
    }

    pub fn signature_value(&self) -> Option<&[u8]> {
        self.signature_value.as_deref()
    }

    pub fn key_info(&self) -> Option<&TokenStream> {
        self.key_info.as_ref()
    }

    fn expect_state(&self, expected: SignatureState, operation: &str) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState(format!(
                "cannot {operation} a signature in state {:?}",
                self.state
            )));
        }
        Ok(())
    }

    fn transition(&mut self, next: SignatureState) {
        debug!("signature state {:?} -> {next:?}", self.state);
        self.state = next;
    }

    pub fn add_reference(&mut self, reference: Reference) -> Result<()> {
        self.expect_state(SignatureState::Unsigned, "add a reference to")?;
        self.signed_info.add_reference(reference);
        Ok(())
    }

    /// Computes the reference digests, then the signature value.
    pub fn sign(&mut self, key: &SecurityKey, ctx: &DsigContext) -> Result<&[u8]> {
        self.expect_state(SignatureState::Unsigned, "sign")?;
        self.signed_info.compute_reference_digests(ctx)?;
        self.compute_signature(key, ctx)
    }

    /// Signs the canonical `SignedInfo`. The reference digests must already
    /// be computed.
    pub fn compute_signature(&mut self, key: &SecurityKey, ctx: &DsigContext) -> Result<&[u8]> {
        self.expect_state(SignatureState::Unsigned, "sign")?;
        let method = self.signed_info.signature_method();
        let value = match key {
            SecurityKey::Symmetric(secret) => {
                let engine = ctx.registry.keyed_hash(method, secret)?;
                self.signed_info.compute_hash(engine)?
            }
            _ => {
                let formatter = ctx.registry.asymmetric(method)?;
                let (hash_name, hash) = self.asymmetric_hash(formatter.hash_name(), ctx)?;
                formatter.sign_hash(key, hash_name, &hash)?
            }
        };
        self.transition(SignatureState::Signed);
        Ok(self.signature_value.insert(value))
    }

    /// Hashes the canonical `SignedInfo` for an asymmetric signature. In
    /// FIPS mode RSA-SHA256 takes its hash from the FIPS-approved engine.
    fn asymmetric_hash(&self, hash_name: HashName, ctx: &DsigContext) -> Result<(HashName, Vec<u8>)> {
        if ctx.fips_required() && self.signed_info.signature_method() == algorithm::RSA_SHA256 {
            debug!("hashing SignedInfo with the FIPS SHA-256 engine");
            let hash = self.signed_info.compute_hash(ctx.registry.fips_sha256()?)?;
            return Ok((HashName::Sha256, hash));
        }
        let hash = self
            .signed_info
            .compute_hash(ctx.registry.hash(hash_name.digest_uri())?)?;
        Ok((hash_name, hash))
    }

    /// Checks the signature value over the canonical `SignedInfo` with
    /// `key`. Any mismatch is [`Error::SignatureVerificationFailed`].
    pub fn start_signature_verification(
        &mut self,
        key: &SecurityKey,
        ctx: &DsigContext,
    ) -> Result<()> {
        self.expect_state(SignatureState::Parsed, "verify")?;
        let expected = self
            .signature_value
            .as_deref()
            .ok_or_else(|| Error::InvalidState("signature has no value".into()))?;
        let method = self.signed_info.signature_method();
        let valid = match key {
            SecurityKey::Symmetric(secret) => {
                let engine = ctx.registry.keyed_hash(method, secret)?;
                let actual = self.signed_info.compute_hash(engine)?;
                constant_time_eq(&actual, expected)
            }
            _ => {
                let formatter = ctx.registry.asymmetric(method)?;
                let (hash_name, hash) = self.asymmetric_hash(formatter.hash_name(), ctx)?;
                formatter.verify_hash(key, hash_name, &hash, expected)?
            }
        };
        if !valid {
            return Err(Error::SignatureVerificationFailed);
        }
        self.transition(SignatureState::PartiallyVerified);
        Ok(())
    }

    /// Offers the element with id `id` to the references. Only valid once
    /// the signature value has been verified.
    pub fn ensure_digest_validity_if_id_matches(
        &mut self,
        id: &str,
        source: &TokenStream,
        ctx: &DsigContext,
    ) -> Result<bool> {
        self.expect_state(SignatureState::PartiallyVerified, "match references of")?;
        self.signed_info
            .ensure_digest_validity_if_id_matches(id, source, ctx)
    }

    /// Fails unless every reference has been matched and verified.
    pub fn complete_signature_verification(&mut self) -> Result<()> {
        self.expect_state(SignatureState::PartiallyVerified, "complete verification of")?;
        self.signed_info.ensure_all_references_verified()?;
        self.transition(SignatureState::FullyVerified);
        Ok(())
    }

    /// Reads a `<ds:Signature>` element. `<ds:Object>` children are skipped.
    pub fn read_from(reader: &mut dyn XmlRead, factory: &TransformFactory) -> Result<Self> {
        let start = read_start_element(reader, ns::node::SIGNATURE, ns::DSIG)?;
        let signed_info = SignedInfo::read_from(reader, factory)?;

        let value = read_start_element(reader, ns::node::SIGNATURE_VALUE, ns::DSIG)?;
        let signature_value = read_element_content_as_base64(reader)?;

        let key_info = if is_start_element(reader, ns::node::KEY_INFO, ns::DSIG)? {
            Some(TokenStream::record(reader)?.trim())
        } else {
            None
        };
        loop {
            skip_misc(reader)?;
            if !matches!(reader.peek()?, XmlEvent::Start(_)) {
                break;
            }
            skip_element(reader)?;
        }
        read_end_element(reader)?;

        Ok(Self {
            id: start.attribute(ns::attr::ID).map(str::to_owned),
            signed_info,
            signature_value: Some(signature_value),
            signature_value_id: value.attribute(ns::attr::ID).map(str::to_owned),
            key_info,
            state: SignatureState::Parsed,
        })
    }

    /// Writes the `<ds:Signature>` element, declaring the `ds` prefix.
    pub fn write_to(&self, sink: &mut dyn XmlSink) -> Result<()> {
        let value = self
            .signature_value
            .as_deref()
            .ok_or_else(|| Error::InvalidState("signature value not computed".into()))?;
        sink.start_element(ns::DSIG_PREFIX, ns::node::SIGNATURE, ns::DSIG)?;
        sink.namespace_declaration(ns::DSIG_PREFIX, ns::DSIG)?;
        if let Some(id) = &self.id {
            sink.attribute("", ns::attr::ID, "", id)?;
        }
        self.signed_info.write_to(sink)?;
        sink.start_element(ns::DSIG_PREFIX, ns::node::SIGNATURE_VALUE, ns::DSIG)?;
        if let Some(id) = &self.signature_value_id {
            sink.attribute("", ns::attr::ID, "", id)?;
        }
        sink.text(&encode_base64(value))?;
        sink.end_element()?;
        if let Some(key_info) = &self.key_info {
            key_info.write_to(sink)?;
        }
        sink.end_element()
    }
}

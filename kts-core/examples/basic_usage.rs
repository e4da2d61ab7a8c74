//! Basic usage example for KTS round aggregation and verification
//!
//! This example demonstrates:
//! - Aggregating document imprints into one signed round
//! - Issuing timestamp tokens for each document
//! - Extending a token into a published calendar and checking it
//!
//! Run with: cargo run -p kts-core --example basic_usage

use std::convert::Infallible;

use ed25519_dalek::{Signer, SigningKey};
use kts_core::{AggregationLeaf, HashTreeBuilder, NonceGenerator, PublicationsFileBuilder, Token};
use kts_types::{
    messages::{build_sign_message, calendar_leaf_hash},
    CalendarChain, Digest, ExtendResponse, HashAlgorithm, PublicKey, Signature, Timestamp,
    TimestampToken, PROTOCOL_VERSION,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Keyless Timestamping Example");
    println!("============================\n");

    let aggregator = SigningKey::from_bytes(&[1u8; 32]);
    let aggregator_key = PublicKey::new(aggregator.verifying_key().to_bytes());
    let publisher = SigningKey::from_bytes(&[2u8; 32]);
    let publisher_key = PublicKey::new(publisher.verifying_key().to_bytes());

    // Step 1: Hash the documents
    let documents: [&[u8]; 3] = [
        b"Hello, world!",
        b"Timestamp this document",
        b"Another piece of data",
    ];
    let imprints: Vec<_> = documents
        .iter()
        .map(|data| HashAlgorithm::DEFAULT.hash(data))
        .collect();

    println!("Imprints:");
    for (i, imprint) in imprints.iter().enumerate() {
        println!("  {}. {}", i + 1, imprint);
    }
    println!();

    // Step 2: Blind each imprint with a nonce and aggregate the round
    let mut nonce_gen = NonceGenerator::new();
    let leaves: Vec<AggregationLeaf> = imprints
        .iter()
        .map(|imprint| AggregationLeaf {
            imprint: imprint.clone(),
            nonce: nonce_gen.generate(),
        })
        .collect();

    let mut builder = HashTreeBuilder::with_capacity(leaves.len());
    for leaf in &leaves {
        builder.add_leaf(leaf.compute_hash());
    }
    let tree = builder.build();

    // Step 3: Sign the round root
    let registration_time = Timestamp::now();
    let round_root = tree.root();
    let signature = aggregator.sign(&build_sign_message(&round_root, &registration_time));

    println!("Round:");
    println!("  Leaves:     {}", tree.leaf_count());
    println!("  Root:       {}", round_root);
    println!("  Registered: {}", registration_time);
    println!();

    // Step 4: One token per document
    let tokens = leaves
        .into_iter()
        .enumerate()
        .map(|(i, leaf)| {
            let aggregation_path = tree.generate_path(i).ok_or("missing path")?;
            Ok(TimestampToken {
                imprint: leaf.imprint,
                nonce: leaf.nonce,
                aggregation_path,
                round_root,
                registration_time,
                signature: Signature::new(signature.to_bytes()),
                signing_key: aggregator_key.clone(),
                calendar_chain: None,
            })
        })
        .collect::<Result<Vec<_>, &str>>()?;

    for (i, token) in tokens.iter().enumerate() {
        let code = token.verify()? | token.compare_hash(imprints[i].digest(), HashAlgorithm::DEFAULT)?;
        println!("  Token {} self-check: {}", i + 1, code);
    }
    println!();

    // Step 5: A calendar of this round and a later one, published at the head
    let later = registration_time.add_nanos(1_000_000_000);
    let calendar: kts_core::HashTree = [
        calendar_leaf_hash(&round_root, &registration_time),
        calendar_leaf_hash(&Digest::new([9u8; 32]), &later),
    ]
    .into_iter()
    .collect();

    let mut file = PublicationsFileBuilder::new();
    file.add_key(registration_time, &aggregator_key);
    file.add_publication(later, calendar.root());
    let publications = file.encode(&publisher_key, |msg| {
        Ok::<_, Infallible>(Signature::new(publisher.sign(msg).to_bytes()))
    })?;

    // Before extension only the signing key can be checked
    let code = tokens[0].check_publication(&publications)?;
    println!("Unextended publication check: {}", code);

    // Step 6: Extend the first token to the publication
    let response = ExtendResponse {
        version: PROTOCOL_VERSION,
        calendar_chain: CalendarChain {
            publication_time: later,
            path: calendar.generate_path(0).ok_or("missing calendar path")?,
        },
    };
    let extended = tokens[0].extend(&serde_json::to_vec(&response)?)?;

    let code = extended.verify()? | extended.check_publication(&publications)?;
    println!("Extended publication check:   {}", code);

    if !code.is_valid() {
        return Err("extended token failed verification".into());
    }

    println!("\nAll tokens verified successfully!");
    Ok(())
}

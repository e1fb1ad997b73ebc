// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#[test]
fn hashes() {
    let mut src = "meep".as_bytes();

    let dst = Vec::with_capacity(10);
    let mut hasher = super::WriterHasher::new(dst);
    assert_eq!(std::io::copy(&mut src, &mut hasher).unwrap(), 4);
    let want = (
        super::Digest::new(
            super::Fingerprint::from_hex_string(
                "23e92dfba8fb0c93cfba31ad2962b4e35a47054296d1d375d7f7e13e0185de7a",
            )
            .unwrap(),
            4,
        ),
        "meep".as_bytes().to_vec(),
    );
    assert_eq!(hasher.finish(), want);
}

#[test]
fn copy_and_hash_matches_of_bytes() {
    let input = b"the quick brown fox";
    let mut out = Vec::new();
    let digest = super::sync_copy_and_hash(&mut &input[..], &mut out).unwrap();
    assert_eq!(digest, super::Digest::of_bytes(input));
    assert_eq!(out, input);
}

#[test]
fn identical_streams_hash_identically() {
    let mut one = super::WriterHasher::new(std::io::sink());
    let mut two = super::WriterHasher::new(std::io::sink());
    std::io::copy(&mut &b"stable"[..], &mut one).unwrap();
    std::io::copy(&mut &b"stable"[..], &mut two).unwrap();
    assert_eq!(one.finish().0, two.finish().0);
}

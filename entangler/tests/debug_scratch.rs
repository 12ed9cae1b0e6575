use braid_storage::mock::FakeStorage;

#[tokio::test]
async fn debug_map() {
    let store = FakeStorage::new();
    let uploaded = braid_entangler::uploader::Uploader::new(store.clone(), braid_entangler::Config::default())
        .upload(bytes::Bytes::from(vec![0x5Au8; 4096]))
        .await
        .unwrap();
    eprintln!("map = {:?}", uploaded.metadata.data_cid_index_map);
    eprintln!("num_blocks = {}", uploaded.metadata.num_blocks);
    eprintln!("leaves = {}", uploaded.metadata.leaves);
}

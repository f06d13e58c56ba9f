use uuid::Uuid;

/// 生成记录 ID。
pub fn record_id() -> String {
    Uuid::new_v4().to_string()
}

/// 随机种子，取值范围 [0, 2147483647)，与各服务商接受的 int32 种子一致。
pub fn random_seed() -> u64 {
    random_u64() % 2_147_483_647
}

fn random_u64() -> u64 {
    // 复用 UUID v4 的随机源，避免额外引入 rand 依赖。
    let b = *Uuid::new_v4().as_bytes();
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

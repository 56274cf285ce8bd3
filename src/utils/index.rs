/// Decimal places of the ERG native token.
pub const ERG_DECIMALS: u32 = 9;

pub fn format_erg_amount(amount: u64) -> String {
    format!(
        "{:.*}",
        ERG_DECIMALS as usize,
        amount as f64 / 10f64.powi(ERG_DECIMALS as i32)
    )
}

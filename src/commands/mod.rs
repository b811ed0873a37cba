pub mod orders;
pub mod promo_codes;
pub mod shifts;

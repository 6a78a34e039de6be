// adapted from the bigdecimal crate
use std::{fmt, io::Cursor, str::FromStr};

use bigdecimal::{
    BigDecimal, ParseBigDecimalError,
    num_bigint::{BigInt, BigUint, Sign},
};
use byteorder::{BigEndian, ReadBytesExt};
use tokio_postgres::types::{FromSql, Type};

/// A Postgres `numeric`, covering its special values.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Clone)]
pub enum PgNumeric {
    NaN,
    PositiveInf,
    NegativeInf,
    Value(BigDecimal),
}

impl FromStr for PgNumeric {
    type Err = ParseBigDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match BigDecimal::from_str(s) {
            Ok(n) => Ok(PgNumeric::Value(n)),
            Err(e) => match s.to_lowercase().as_str() {
                "infinity" => Ok(PgNumeric::PositiveInf),
                "-infinity" => Ok(PgNumeric::NegativeInf),
                "nan" => Ok(PgNumeric::NaN),
                _ => Err(e),
            },
        }
    }
}

/// Decodes the binary wire format: digit count, weight, sign and display scale
/// followed by base 10000 digits.
impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + 'static + Sync + Send>> {
        let mut rdr = Cursor::new(raw);

        let n_digits = rdr.read_u16::<BigEndian>()?;
        let weight = rdr.read_i16::<BigEndian>()?;
        let sign = match rdr.read_u16::<BigEndian>()? {
            0x4000 => Sign::Minus,
            0x0000 => Sign::Plus,
            0xC000 => return Ok(PgNumeric::NaN),
            0xD000 => return Ok(PgNumeric::PositiveInf),
            0xF000 => return Ok(PgNumeric::NegativeInf),
            v => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("invalid numeric sign {v:#04x}"),
                )
                .into());
            }
        };
        let scale = rdr.read_u16::<BigEndian>()?;

        let mut magnitude = BigUint::from(0u32);
        for n in (0..n_digits).rev() {
            let digit = rdr.read_u16::<BigEndian>()?;
            magnitude += BigUint::from(digit) * BigUint::from(10_000u32).pow(u32::from(n));
        }

        // The leading digit carries 10_000^(n_digits - 1) but must carry 10_000^weight.
        let correction_exp = 4 * (i64::from(weight) - i64::from(n_digits) + 1);
        let value = BigDecimal::new(BigInt::from_biguint(sign, magnitude), -correction_exp)
            .with_scale(i64::from(scale));

        Ok(PgNumeric::Value(value))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(*ty, Type::NUMERIC)
    }
}

impl fmt::Display for PgNumeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgNumeric::NaN => write!(f, "NaN"),
            PgNumeric::PositiveInf => write!(f, "Infinity"),
            PgNumeric::NegativeInf => write!(f, "-Infinity"),
            PgNumeric::Value(n) => write!(f, "{n}"),
        }
    }
}

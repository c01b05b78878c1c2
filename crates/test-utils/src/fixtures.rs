//! Common test fixtures for grib-batch tests.

use chrono::{DateTime, TimeZone, Utc};

/// A model run time on a fixed test day (2024-01-15).
pub fn run_time(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, hour, 0, 0)
        .single()
        .expect("valid test hour")
}

/// Inventory (`.idx`) files as published next to GRIB2 files.
pub mod idx {
    /// Head of an HRRR surface file index, run 2024-01-15 12Z, lead 6.
    pub const HRRR_SFC_F06: &str = "\
1:0:d=2024011512:REFC:entire atmosphere:6 hour fcst:
2:384151:d=2024011512:RETOP:cloud top:6 hour fcst:
3:526738:d=2024011512:VIL:entire atmosphere:6 hour fcst:
4:892133:d=2024011512:VIS:surface:6 hour fcst:
5:1987655:d=2024011512:GUST:surface:6 hour fcst:
6:2877120:d=2024011512:TMP:500 mb:6 hour fcst:
7:3433009:d=2024011512:TMP:2 m above ground:6 hour fcst:
8:4521660:d=2024011512:UGRD:10 m above ground:6 hour fcst:
9:5267134:d=2024011512:VGRD:10 m above ground:6 hour fcst:
10:6001285:d=2024011512:APCP:surface:0-6 hour acc fcst:
";

    /// An analysis (lead 0) index with a duplicated start byte.
    pub const GFS_ANL: &str = "\
1:0:d=2024011500:PRMSL:mean sea level:anl:
2:990253:d=2024011500:TMP:2 m above ground:anl:
3:990253:d=2024011500:TMP:2 m above ground:anl:
4:1725831:d=2024011500:HGT:500 mb:anl:
";
}

/// Model configuration YAML used by source tests.
pub mod models {
    pub const HRRR_YAML: &str = r#"
model:
  id: hrrr
  name: "HRRR"
  description: "High-Resolution Rapid Refresh"
product: sfc
products: [sfc, prs, nat, subh]
sources:
  - name: aws
    url: "https://noaa-hrrr-bdp-pds.s3.amazonaws.com/hrrr.{date}/conus/hrrr.t{cycle:02}z.wrf{product}f{forecast:02}.grib2"
  - name: nomads
    url: "https://nomads.ncep.noaa.gov/pub/data/nccf/com/hrrr/prod/hrrr.{date}/conus/hrrr.t{cycle:02}z.wrf{product}f{forecast:02}.grib2"
"#;
}

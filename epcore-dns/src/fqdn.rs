//! 3GPP FQDN construction (TS 23.003 §19).
//!
//! MNC and MCC are zero-padded to three digits; a PLMN id is the packed
//! three-byte BCD form carried in signalling.

fn pad3(v: &str) -> String {
    format!("{v:0>3}")
}

/// Splits a packed PLMN id into (mnc, mcc) digit strings.
pub fn parse_plmn_id(plmnid: &[u8; 3]) -> (String, String) {
    let mcc = format!(
        "{}{}{}",
        plmnid[0] & 0x0F,
        (plmnid[0] & 0xF0) >> 4,
        plmnid[1] & 0x0F
    );
    let mnc_digit3 = (plmnid[1] & 0xF0) >> 4;
    let mnc = if mnc_digit3 == 0x0F {
        format!("{}{}", plmnid[2] & 0x0F, (plmnid[2] & 0xF0) >> 4)
    } else {
        format!(
            "{}{}{}",
            plmnid[2] & 0x0F,
            (plmnid[2] & 0xF0) >> 4,
            mnc_digit3
        )
    };
    (mnc, mcc)
}

/// `mnc<MNC>.mcc<MCC>.3gppnetwork.org`
pub fn home_network(mnc: &str, mcc: &str) -> String {
    format!("mnc{}.mcc{}.3gppnetwork.org", pad3(mnc), pad3(mcc))
}

/// `mnc<MNC>.mcc<MCC>.gprs`
pub fn home_network_gprs(mnc: &str, mcc: &str) -> String {
    format!("mnc{}.mcc{}.gprs", pad3(mnc), pad3(mcc))
}

/// `epc.mnc<MNC>.mcc<MCC>.3gppnetwork.org`
pub fn epc(mnc: &str, mcc: &str) -> String {
    format!("epc.{}", home_network(mnc, mcc))
}

/// `<apn>.apn.epc.mnc<MNC>.mcc<MCC>.3gppnetwork.org`
pub fn apn_fqdn(apn: &str, mnc: &str, mcc: &str) -> String {
    format!("{apn}.apn.{}", epc(mnc, mcc))
}

/// `<apn>.apn.mnc<MNC>.mcc<MCC>.gprs`
pub fn apn(apn: &str, mnc: &str, mcc: &str) -> String {
    format!("{apn}.apn.{}", home_network_gprs(mnc, mcc))
}

/// `tac-lb<LB>.tac-hb<HB>.tac.epc.…` (tracking area identity)
pub fn tai_fqdn(lb: &str, hb: &str, mnc: &str, mcc: &str) -> String {
    format!("tac-lb{lb}.tac-hb{hb}.tac.{}", epc(mnc, mcc))
}

/// `mmec<MMEC>.mmegi<MMEGI>.mme.epc.…`
pub fn mme_fqdn(mmec: &str, mmegi: &str, mnc: &str, mcc: &str) -> String {
    format!("mmec{mmec}.mmegi{mmegi}.mme.{}", epc(mnc, mcc))
}

/// `mmegi<MMEGI>.mme.epc.…` (MME pool)
pub fn mme_pool_fqdn(mmegi: &str, mnc: &str, mcc: &str) -> String {
    format!("mmegi{mmegi}.mme.{}", epc(mnc, mcc))
}

/// `rac<RAC>.lac<LAC>.rac.epc.…` (routing area identity)
pub fn rai_fqdn(rac: &str, lac: &str, mnc: &str, mcc: &str) -> String {
    format!("rac{rac}.lac{lac}.rac.{}", epc(mnc, mcc))
}

/// `rnc<RNC>.rnc.epc.…` (radio network controller)
pub fn rnc_fqdn(rnc: &str, mnc: &str, mcc: &str) -> String {
    format!("rnc{rnc}.rnc.{}", epc(mnc, mcc))
}

/// `nri<NRI>.rac<RAC>.lac<LAC>.rac.epc.…` (SGSN)
pub fn sgsn_fqdn(nri: &str, rac: &str, lac: &str, mnc: &str, mcc: &str) -> String {
    format!("nri{nri}.rac{rac}.lac{lac}.rac.{}", epc(mnc, mcc))
}

/// `node.epc.…` (the EPC nodes DNS zone)
pub fn epc_nodes_domain_fqdn(mnc: &str, mcc: &str) -> String {
    format!("node.{}", epc(mnc, mcc))
}

/// `<node>.node.epc.…`
pub fn epc_node_fqdn(node: &str, mnc: &str, mcc: &str) -> String {
    format!("{node}.{}", epc_nodes_domain_fqdn(mnc, mcc))
}

/// `enb<ENB>.enb.epc.…` (global eNodeB id)
pub fn global_enodeb_id_fqdn(enb: &str, mnc: &str, mcc: &str) -> String {
    format!("enb{enb}.enb.{}", epc(mnc, mcc))
}

/// `epdg.epc.mnc<MNC>.mcc<MCC>.pub.3gppnetwork.org` (operator-id ePDG)
pub fn nonemergency_epdg_oi_fqdn(mnc: &str, mcc: &str) -> String {
    format!("epdg.epc.mnc{}.mcc{}.pub.3gppnetwork.org", pad3(mnc), pad3(mcc))
}

/// `tac-lb<LB>.tac-hb<HB>.tac.epdg.epc.….pub.3gppnetwork.org`
pub fn nonemergency_epdg_tai_fqdn(lb: &str, hb: &str, mnc: &str, mcc: &str) -> String {
    format!(
        "tac-lb{lb}.tac-hb{hb}.tac.{}",
        nonemergency_epdg_oi_fqdn(mnc, mcc)
    )
}

/// `lac<LAC>.epdg.epc.….pub.3gppnetwork.org`
pub fn nonemergency_epdg_lac_fqdn(lac: &str, mnc: &str, mcc: &str) -> String {
    format!("lac{lac}.{}", nonemergency_epdg_oi_fqdn(mnc, mcc))
}

/// `epdg.epc.mcc<MCC>.visited-country.pub.3gppnetwork.org`
pub fn nonemergency_epdg_visitedcountry_fqdn(mcc: &str) -> String {
    format!(
        "epdg.epc.mcc{}.visited-country.pub.3gppnetwork.org",
        pad3(mcc)
    )
}

/// `sos.epdg.epc.….pub.3gppnetwork.org` (emergency ePDG)
pub fn emergency_epdg_oi_fqdn(mnc: &str, mcc: &str) -> String {
    format!(
        "sos.epdg.epc.mnc{}.mcc{}.pub.3gppnetwork.org",
        pad3(mnc),
        pad3(mcc)
    )
}

/// `tac-lb<LB>.tac-hb<HB>.tac.sos.epdg.epc.….pub.3gppnetwork.org`
pub fn emergency_epdg_tai_fqdn(lb: &str, hb: &str, mnc: &str, mcc: &str) -> String {
    format!(
        "tac-lb{lb}.tac-hb{hb}.tac.{}",
        emergency_epdg_oi_fqdn(mnc, mcc)
    )
}

/// `lac<LAC>.sos.epdg.epc.….pub.3gppnetwork.org`
pub fn emergency_epdg_lac_fqdn(lac: &str, mnc: &str, mcc: &str) -> String {
    format!("lac{lac}.{}", emergency_epdg_oi_fqdn(mnc, mcc))
}

/// `sos.epdg.epc.mcc<MCC>.visited-country.pub.3gppnetwork.org`
pub fn emergency_epdg_visitedcountry_fqdn(mcc: &str) -> String {
    format!(
        "sos.epdg.epc.mcc{}.visited-country.pub.3gppnetwork.org",
        pad3(mcc)
    )
}

/// `<lhn>.lhn.epc.mcc<MCC>.visited-country.pub.3gppnetwork.org`
pub fn local_homenetwork_fqdn(lhn: &str, mcc: &str) -> String {
    format!(
        "{lhn}.lhn.epc.mcc{}.visited-country.pub.3gppnetwork.org",
        pad3(mcc)
    )
}

/// `diameter.epc.…`
pub fn diameter_fqdn(mnc: &str, mcc: &str) -> String {
    format!("diameter.{}", epc(mnc, mcc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apn_fqdn_layout() {
        assert_eq!(
            apn_fqdn("apn1", "120", "310"),
            "apn1.apn.epc.mnc120.mcc310.3gppnetwork.org"
        );
    }

    #[test]
    fn test_mnc_zero_padding() {
        assert_eq!(home_network("5", "44"), "mnc005.mcc044.3gppnetwork.org");
    }

    #[test]
    fn test_tai_and_mme() {
        assert_eq!(
            tai_fqdn("01", "02", "120", "310"),
            "tac-lb01.tac-hb02.tac.epc.mnc120.mcc310.3gppnetwork.org"
        );
        assert_eq!(
            mme_fqdn("1a", "8001", "120", "310"),
            "mmec1a.mmegi8001.mme.epc.mnc120.mcc310.3gppnetwork.org"
        );
    }

    #[test]
    fn test_epdg_variants() {
        assert_eq!(
            nonemergency_epdg_oi_fqdn("120", "310"),
            "epdg.epc.mnc120.mcc310.pub.3gppnetwork.org"
        );
        assert_eq!(
            emergency_epdg_lac_fqdn("fe01", "120", "310"),
            "lacfe01.sos.epdg.epc.mnc120.mcc310.pub.3gppnetwork.org"
        );
        assert_eq!(
            nonemergency_epdg_visitedcountry_fqdn("310"),
            "epdg.epc.mcc310.visited-country.pub.3gppnetwork.org"
        );
    }

    #[test]
    fn test_parse_plmn_id_two_digit_mnc() {
        // mcc=310, mnc=12 (filler nibble)
        let plmn = [0x13, 0xF0, 0x21];
        let (mnc, mcc) = parse_plmn_id(&plmn);
        assert_eq!(mcc, "310");
        assert_eq!(mnc, "12");
    }
}

//! Shopper-facing explanations for gateway `status_detail` codes.

const GENERIC_REJECTION: &str = "Não foi possível processar o pagamento. Tente outro meio de pagamento.";

/// Maps a `status_detail` to a hint the shopper can act on.
pub fn status_hint(status_detail: Option<&str>) -> &'static str {
    let Some(detail) = status_detail else {
        return GENERIC_REJECTION;
    };

    match detail.trim() {
        "cc_rejected_insufficient_amount" => "Saldo ou limite insuficiente. Use outro cartão ou meio de pagamento.",
        "cc_rejected_bad_filled_card_number" => "Confira o número do cartão.",
        "cc_rejected_bad_filled_date" => "Confira a data de validade do cartão.",
        "cc_rejected_bad_filled_security_code" => "Confira o código de segurança do cartão.",
        "cc_rejected_bad_filled_other" => "Confira os dados do cartão.",
        "cc_rejected_call_for_authorize" => "Autorize o pagamento junto ao banco emissor do cartão.",
        "cc_rejected_card_disabled" => "Ligue para o banco emissor para ativar o cartão.",
        "cc_rejected_duplicated_payment" => "Você já fez um pagamento com esse valor. Use outro cartão se precisar pagar novamente.",
        "cc_rejected_high_risk" => "O pagamento foi recusado. Escolha outro meio de pagamento.",
        "cc_rejected_max_attempts" => "Você atingiu o limite de tentativas. Escolha outro cartão ou meio de pagamento.",
        "cc_rejected_blacklist" | "cc_rejected_other_reason" => "O banco emissor não aprovou o pagamento.",
        "pending_contingency" => "Estamos processando o pagamento. Você receberá o resultado por e-mail.",
        "pending_review_manual" => "O pagamento está em análise. Você receberá o resultado por e-mail.",
        "expired" => "O prazo para pagamento expirou. Inicie um novo pagamento.",
        _ => GENERIC_REJECTION,
    }
}
